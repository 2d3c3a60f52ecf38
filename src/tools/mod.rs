/// Calculate reciprocal sum of reciprocals.
/// Accepts >=2 arguments.
/// If the values are resistances, then the output is resistance when
/// connected in parallel.
/// If the values are conductivity, then the output is conductivity when
/// connected in series.
macro_rules! reciprocal_sum {
    ($head:expr, $( $tail:expr ),+) => {
        ($head.recip() $(+ $tail.recip())*).recip()
    }
}
pub(crate) use reciprocal_sum; // Make the macro visible

/// Molar mass of CO2 [g/mol]
const CO2_MOLAR_MASS: f64 = 44.01;
/// Molar volume of an ideal gas at 25 °C and 1 atm [l/mol]
const MOLAR_VOLUME: f64 = 24.45;

/// Convert a CO2 volume fraction in ppm to a mass concentration in mg/m^3.
pub fn ppm_to_mg_m3(ppm: f64) -> f64 {
    ppm * CO2_MOLAR_MASS / MOLAR_VOLUME
}

/// Convert a CO2 mass concentration in mg/m^3 to a volume fraction in ppm.
pub fn mg_m3_to_ppm(mg_m3: f64) -> f64 {
    mg_m3 * MOLAR_VOLUME / CO2_MOLAR_MASS
}
