//! Intent classifier adapters.

pub mod anthropic;
pub mod scripted;

pub use anthropic::AnthropicIntentClassifier;
pub use scripted::{ScriptedClassifier, ScriptedReply};
