// Event detection
//
// `motion` flags frame-to-frame change; `confirm` optionally asks an object
// classifier whether a motion event contains something worth keeping.

pub mod confirm;
pub mod motion;

pub use confirm::{coco_label, ClassifierError, ConfirmationFilter, Confirmation, ObjectClassifier, Prediction};
pub use motion::{MotionDetector, MotionSample};
