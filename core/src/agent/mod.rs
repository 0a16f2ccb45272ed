//! Agent domain types: identity, energy, mutable state, intents.

pub mod energy;
pub mod identity;
pub mod intent;
pub mod state;

pub use energy::{DrainKind, EnergyConfig, EnergyModel};
pub use identity::{AgentIdentity, GenderTag, PersonalityTraits, UserModel};
pub use intent::{Intent, IntentEnvelope, IntentTrace, MessageOptions, ParseMode};
pub use state::{AgentState, AlertnessMode, SleepState, StateField, TickBounds};
