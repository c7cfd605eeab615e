mod auth;
mod rules;
mod run;

pub use auth::*;
pub use rules::*;
pub use run::*;
