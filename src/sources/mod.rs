pub mod account;
pub mod archive;
pub mod checkout;
pub mod history;
pub mod registry;
