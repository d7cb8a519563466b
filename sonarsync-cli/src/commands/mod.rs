pub mod check;
pub mod connection;
pub mod run;
pub mod show;
