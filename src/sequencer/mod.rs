pub mod arp;
pub mod clock;
pub mod engine;
pub mod pattern;

pub use arp::{ArpSettings, ArpStepMode, Arpeggiator, ARP_DIVISIONS};
pub use clock::{period_for_bpm, Clock, PPQ};
pub use engine::{PlayMode, SequencerEngine, StepNotes};
pub use pattern::{
    BankMode, Sequence, SequenceBank, SequenceParam, CONTROLLERS, NUM_SEQUENCES, SEQ_DIVISIONS,
    SEQ_VOICES, STEPS,
};
