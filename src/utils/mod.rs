//! Utilidades del sistema
//! 
//! Este módulo contiene utilidades para manejo de errores, reloj inyectable
//! y helpers de timeout.

pub mod clock;
pub mod errors;
pub mod timeout;

pub use clock::{Clock, FixedClock, SystemClock};
pub use errors::{AppError, AppResult};
pub use timeout::with_timeout;
