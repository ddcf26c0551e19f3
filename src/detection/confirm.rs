// Object confirmation filter
//
// Wraps an optional external object classifier. A motion event is confirmed
// when the classifier reports an allowed label at or above the confidence
// threshold. Without a classifier every query passes.

use std::collections::HashSet;

use image::RgbImage;

use crate::config::ConfirmationConfig;

/// Error type for classifier backends
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// One detection reported by a classifier
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    /// Bounding box as (x, y, width, height) in pixels
    pub region: Option<(u32, u32, u32, u32)>,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            region: None,
        }
    }
}

/// External object classification backend
pub trait ObjectClassifier: Send {
    fn classify(&mut self, frame: &RgbImage) -> Result<Vec<Prediction>, ClassifierError>;
}

/// Outcome of a confirmation query
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub found: bool,
    pub label: Option<String>,
    pub confidence: f32,
}

impl Confirmation {
    fn pass() -> Self {
        Self {
            found: true,
            label: None,
            confidence: 0.0,
        }
    }

    fn miss() -> Self {
        Self {
            found: false,
            label: None,
            confidence: 0.0,
        }
    }
}

pub struct ConfirmationFilter {
    classifier: Option<Box<dyn ObjectClassifier>>,
    threshold: f32,
    labels: HashSet<String>,
}

impl ConfirmationFilter {
    pub fn new(classifier: Option<Box<dyn ObjectClassifier>>, config: &ConfirmationConfig) -> Self {
        Self {
            classifier,
            threshold: config.threshold,
            labels: config.labels.iter().map(|l| l.to_lowercase()).collect(),
        }
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    /// Ask whether `frame` contains a relevant object.
    ///
    /// Classifier errors are logged and treated as a pass so a broken backend
    /// degrades to unfiltered capture.
    pub fn check(&mut self, frame: &RgbImage) -> Confirmation {
        let Some(classifier) = self.classifier.as_mut() else {
            return Confirmation::pass();
        };

        let predictions = match classifier.classify(frame) {
            Ok(predictions) => predictions,
            Err(e) => {
                log::warn!("Object classifier failed, accepting frame: {}", e);
                return Confirmation::pass();
            }
        };

        predictions
            .into_iter()
            .find(|p| p.confidence >= self.threshold && self.labels.contains(&p.label.to_lowercase()))
            .map(|p| Confirmation {
                found: true,
                confidence: p.confidence,
                label: Some(p.label),
            })
            .unwrap_or_else(Confirmation::miss)
    }
}

/// Name for a COCO category id, for classifiers that report numeric labels
pub fn coco_label(id: u32) -> String {
    match id {
        1 => "person".to_string(),
        17 => "cat".to_string(),
        18 => "dog".to_string(),
        other => format!("obj_{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Prediction>);

    impl ObjectClassifier for Fixed {
        fn classify(&mut self, _frame: &RgbImage) -> Result<Vec<Prediction>, ClassifierError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl ObjectClassifier for Broken {
        fn classify(&mut self, _frame: &RgbImage) -> Result<Vec<Prediction>, ClassifierError> {
            Err(ClassifierError::Inference("model crashed".into()))
        }
    }

    fn filter(classifier: Option<Box<dyn ObjectClassifier>>) -> ConfirmationFilter {
        ConfirmationFilter::new(classifier, &ConfirmationConfig::default())
    }

    #[test]
    fn missing_classifier_always_passes() {
        let mut filter = filter(None);
        assert!(!filter.has_classifier());
        assert!(filter.check(&RgbImage::new(8, 8)).found);
    }

    #[test]
    fn requires_allowed_label_and_confidence() {
        let frame = RgbImage::new(8, 8);

        let mut low = filter(Some(Box::new(Fixed(vec![Prediction::new("person", 0.30)]))));
        assert!(!low.check(&frame).found);

        let mut wrong = filter(Some(Box::new(Fixed(vec![Prediction::new("car", 0.99)]))));
        assert!(!wrong.check(&frame).found);

        let mut good = filter(Some(Box::new(Fixed(vec![
            Prediction::new("car", 0.99),
            Prediction::new("Dog", 0.45),
        ]))));
        let result = good.check(&frame);
        assert!(result.found);
        assert_eq!(result.label.as_deref(), Some("Dog"));
        assert_eq!(result.confidence, 0.45);
    }

    #[test]
    fn classifier_error_passes() {
        let mut filter = filter(Some(Box::new(Broken)));
        assert!(filter.check(&RgbImage::new(8, 8)).found);
    }

    #[test]
    fn coco_names() {
        assert_eq!(coco_label(1), "person");
        assert_eq!(coco_label(17), "cat");
        assert_eq!(coco_label(18), "dog");
        assert_eq!(coco_label(3), "obj_3");
    }
}
