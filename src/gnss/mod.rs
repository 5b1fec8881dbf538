
pub mod acquisition;
pub mod channel;
pub mod ephemeris;
pub mod observation;
pub mod pvt;
pub mod signal;
pub mod signal_modulation;
pub mod supervisor;
pub mod telemetry;
pub mod tracking;
