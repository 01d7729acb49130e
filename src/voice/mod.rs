pub mod allocator;

pub use allocator::{NoteResponse, NoteSource, VoiceAllocator, PANEL_KEYS};
