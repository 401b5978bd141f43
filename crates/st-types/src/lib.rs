pub mod errors;
pub mod params;
pub mod record;
pub mod run;

pub use errors::*;
pub use params::*;
pub use record::*;
pub use run::*;
