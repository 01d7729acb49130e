pub mod filter;
pub mod shaper;

pub use filter::{FilterMode, SvfFilter};
pub use shaper::{bit_munch, GainTable, ShaperKind, Waveshaper};
