pub mod alvys;
pub mod clients;
