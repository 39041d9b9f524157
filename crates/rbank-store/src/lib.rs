mod bank;

pub use bank::JsonBank;
