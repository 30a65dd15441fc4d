mod cert;
mod trust;

pub use cert::*;
pub use trust::*;
