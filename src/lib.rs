pub mod assembler;
pub mod ast;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod header;
pub mod lexer;
pub mod parser;
pub mod playback;
pub mod repeat;
pub mod voice;

pub use ast::*;
pub use config::PlayerConfig;
pub use error::*;
pub use parser::parse;
pub use playback::{PlaybackScheduler, SlotOptions, SoundBackend};

/// Parse ABC source into a playable tune.
/// This is the main entry point for the library.
///
/// Every problem found is returned together as [`AbcError::Diagnostics`].
pub fn compile(source: &str) -> Result<Tune, AbcError> {
    let tune = parse(source);
    if tune.is_complete() {
        Ok(tune)
    } else {
        Err(AbcError::Diagnostics(tune.diagnostics))
    }
}

/// Parse without checking for errors (useful for partial/incomplete tunes)
pub fn compile_unchecked(source: &str) -> Tune {
    parse(source)
}
