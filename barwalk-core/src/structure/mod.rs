//! Market structure: fractal swings and the BULL/BEAR/NEUTRAL classifier.

pub mod classifier;
pub mod fractal;
pub mod mtf;

pub use classifier::{
    classify, final_label, BreakKind, StructureError, StructureEvent, StructureLabel,
    StructureState, SwingReference,
};
pub use fractal::{find_fractals, Fractal, FractalWindow, SwingKind, DEFAULT_FRACTAL_HALF_WINDOW};
pub use mtf::{label_at, structure_at, MtfError, MultiTimeframeStructure, TimeframeLabel};
