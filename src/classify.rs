use ndarray::prelude::*;

use crate::errors::{PredictorError, Result};

/// Softmax over one score vector, computed in f64 with the maximum subtracted.
pub fn softmax(scores: ArrayView1<f32>) -> Array1<f64> {
    let max = scores
        .iter()
        .fold(f64::NEG_INFINITY, |acc, &v| acc.max(f64::from(v)));
    let exp = scores.mapv(|v| (f64::from(v) - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// Index of the largest value; the first one wins ties. NaN never wins, so an
/// all-NaN input yields `None`.
pub fn argmax<'a, I>(values: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a f64>,
{
    values
        .into_iter()
        .enumerate()
        .filter(|(_, value)| !value.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (index, &value)| match best {
            Some((_, current)) if value <= current => best,
            _ => Some((index, value)),
        })
        .map(|(index, _)| index)
}

/// Rounds a probability to a percentage with two decimals.
pub fn confidence_percent(probability: f64) -> f64 {
    (probability * 100.0 * 100.0).round() / 100.0
}

/// Turns `[1, C]` classifier scores into a label and a confidence percentage.
pub fn decode(scores: ArrayView2<f32>, class_names: &[String]) -> Result<(String, f64)> {
    if scores.nrows() != 1 || scores.ncols() == 0 {
        return Err(PredictorError::shape_mismatch(
            "classification decode",
            "[1, C] with C > 0",
            scores.shape(),
        ));
    }

    // A NaN or +inf score turns every probability into NaN.
    let probabilities = softmax(scores.row(0));
    let index = argmax(probabilities.iter()).ok_or_else(|| PredictorError::Model {
        operation: "classification decode".to_string(),
        source: format!("non-finite classifier scores {}", scores.row(0)).into(),
    })?;
    let label = class_names
        .get(index)
        .ok_or(PredictorError::ClassIndexOutOfRange {
            index,
            len: class_names.len(),
        })?;

    Ok((label.clone(), confidence_percent(probabilities[index])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn names(n: usize) -> Vec<String> {
        ["glioma", "meningioma", "no_tumor", "pituitary"][..n]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probabilities = softmax(arr1(&[2.0f32, -1.0, 0.5, 10.0]).view());
        assert!((probabilities.sum() - 1.0).abs() < 1e-12);
        assert!(probabilities.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn test_softmax_is_stable_for_large_scores() {
        let probabilities = softmax(arr1(&[1000.0f32, 1000.0]).view());
        assert_eq!(probabilities, arr1(&[0.5, 0.5]));
    }

    #[test]
    fn test_selected_probability_is_the_maximum() -> Result<()> {
        let scores = arr2(&[[0.3f32, 2.5, -0.7, 1.1]]);
        let (label, confidence) = decode(scores.view(), &names(4))?;

        let probabilities = softmax(scores.row(0));
        let max = probabilities.iter().cloned().fold(f64::MIN, f64::max);
        assert_eq!(label, "meningioma");
        assert_eq!(confidence, confidence_percent(max));
        Ok(())
    }

    #[test]
    fn test_ties_pick_lowest_index() -> Result<()> {
        let (label, confidence) = decode(arr2(&[[1.0f32, 1.0, 1.0, 1.0]]).view(), &names(4))?;
        assert_eq!(label, "glioma");
        assert_eq!(confidence, 25.0);

        assert_eq!(argmax([0.2, 0.7, 0.7].iter()), Some(1));
        assert_eq!(argmax(std::iter::empty()), None);
        Ok(())
    }

    #[test]
    fn test_confidence_rounding() {
        assert_eq!(confidence_percent(1.0 / 3.0), 33.33);
        assert_eq!(confidence_percent(2.0 / 3.0), 66.67);
        assert_eq!(confidence_percent(1.0), 100.0);
    }

    #[test]
    fn test_index_beyond_name_table() {
        let err = decode(arr2(&[[0.0f32, 0.0, 0.0, 5.0]]).view(), &names(3)).unwrap_err();
        match err {
            PredictorError::ClassIndexOutOfRange { index, len } => {
                assert_eq!(index, 3);
                assert_eq!(len, 3);
            }
            other => panic!("Expected ClassIndexOutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_scores_are_rejected() {
        for row in [
            [f32::NAN, 5.0, 0.0, 0.0],
            [0.0, f32::INFINITY, 0.0, 0.0],
            [f32::NEG_INFINITY; 4],
        ] {
            let err = decode(arr2(&[row]).view(), &names(4)).unwrap_err();
            assert!(matches!(err, PredictorError::Model { .. }), "{:?}", row);
        }
    }

    #[test]
    fn test_negative_infinity_is_just_improbable() -> Result<()> {
        let scores = arr2(&[[f32::NEG_INFINITY, 0.0, 0.0, 0.0]]);
        let (label, confidence) = decode(scores.view(), &names(4))?;
        assert_eq!(label, "meningioma");
        assert_eq!(confidence, 33.33);
        Ok(())
    }

    #[test]
    fn test_argmax_skips_nan() {
        assert_eq!(argmax([f64::NAN, 0.1, 0.3].iter()), Some(2));
        assert_eq!(argmax([f64::NAN, f64::NAN].iter()), None);
    }

    #[test]
    fn test_batched_scores_are_rejected() {
        let err = decode(Array2::<f32>::zeros((2, 4)).view(), &names(4)).unwrap_err();
        assert!(matches!(err, PredictorError::TensorShapeMismatch { .. }));
    }
}
