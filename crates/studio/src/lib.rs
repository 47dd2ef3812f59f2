pub mod cli;
pub mod history;
pub mod settings;
pub mod studio;
