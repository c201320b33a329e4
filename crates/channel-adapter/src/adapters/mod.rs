pub mod console;

pub use console::ConsoleAdapter;
