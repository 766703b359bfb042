use ndarray::ArrayView2;

/// Estimate the foreground threshold shared by every slice of a series.
///
/// The threshold is the mean of all samples strictly above `noise_floor`,
/// taken over the whole series at once so that every slice is segmented with
/// the same boundary. When no sample clears the noise floor, `default_threshold`
/// is returned instead.
pub fn estimate_threshold<'a, I>(frames: I, noise_floor: u16, default_threshold: f64) -> f64
where
    I: IntoIterator<Item = ArrayView2<'a, u16>>,
{
    let (sum, count) = frames
        .into_iter()
        .flat_map(|frame| frame.into_iter().copied())
        .filter(|&v| v > noise_floor)
        .fold((0u128, 0u64), |(sum, count), v| (sum + u128::from(v), count + 1));

    if count == 0 {
        default_threshold
    } else {
        sum as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn mean_ignores_samples_at_or_below_noise_floor() {
        let a = array![[0u16, 10, 20], [40, 5, 0]];
        let b = array![[60u16, 0], [0, 80]];
        let threshold = estimate_threshold([a.view(), b.view()], 10, 150.0);
        assert_eq!(threshold, 50.0);
    }

    #[test]
    fn falls_back_to_default_when_everything_is_noise() {
        let a = Array2::<u16>::from_elem((4, 4), 10);
        let b = Array2::<u16>::zeros((4, 4));
        assert_eq!(estimate_threshold([a.view(), b.view()], 10, 150.0), 150.0);
        assert_eq!(estimate_threshold(Vec::<ArrayView2<u16>>::new(), 10, 150.0), 150.0);
    }

    #[test]
    fn repeated_estimates_agree() {
        let frames: Vec<Array2<u16>> = (0..3)
            .map(|i| Array2::from_shape_fn((16, 16), |(r, c)| ((r * 31 + c * 7 + i * 13) % 900) as u16))
            .collect();
        let first = estimate_threshold(frames.iter().map(|f| f.view()), 10, 150.0);
        let second = estimate_threshold(frames.iter().map(|f| f.view()), 10, 150.0);
        assert_eq!(first.to_bits(), second.to_bits());
    }
}
