//! Chat interaction session: gateway events, interaction routing and the
//! in-memory state the handlers share.

pub mod components;
pub mod events;
pub mod handlers;
pub mod links;
pub mod permissions;
pub mod router;
pub mod state;

pub use permissions::PermissionLevel;
pub use router::{handle_interaction, CommandContext, CommandHandler, CommandRegistry};
pub use state::SessionState;
