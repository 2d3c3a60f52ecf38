use std::fs::File;
use std::io;
use std::path::PathBuf;

use clap::Parser;
use log::info;

use room_climate::Case;

#[derive(Parser)]
#[command(name = "room_climate")]
#[command(about = "Transient zone temperature and CO2 simulation", long_about = None)]
struct Cli {
    /// JSON5 case file
    case: PathBuf,

    /// Write the CSV result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the steady state temperature and exit
    #[arg(long)]
    steady_state: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let case = Case::load(&cli.case)?;

    if cli.steady_state {
        println!("{:.3}", case.steady_state()?);
        return Ok(());
    }

    let result = case.run()?;
    match cli.output {
        Some(path) => {
            result.write_csv(File::create(&path)?)?;
            info!("Result of {:?} saved to {:?}", case.name, path);
        }
        None => result.write_csv(io::stdout().lock())?,
    }

    Ok(())
}
