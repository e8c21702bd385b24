pub mod gatt;

pub use gatt::BluerConnector;
