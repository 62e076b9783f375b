//! Módulo de base de datos
//! 
//! Conexiones lógicas y el coordinador de transacciones multi-conexión.

pub mod connection;
pub mod transaction;

pub use connection::{ConnectionHealth, ConnectionRegistry};
pub use transaction::{
    execute_in_transaction, CancelSignal, SessionSet, TransactionCoordinator, TransactionOptions,
};
