/// Floor applied before divisions and logarithms.
pub const EPS: f64 = 1e-10;

/// Logarithmic compression `ln(1 + gamma * x)`.
pub fn log_compress(data: &mut [f64], gamma: f64) {
    data.iter_mut().for_each(|x| *x = (gamma * x.max(0.0)).ln_1p());
}

/// Half-wave rectified first difference. The first element has no predecessor
/// and is defined as zero, so the output has the same length as the input.
pub fn rectified_diff(data: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    if data.is_empty() {
        return out;
    }

    out.push(0.0);
    out.extend(data.windows(2).map(|w| (w[1] - w[0]).max(0.0)));
    out
}

/// Subtracts the moving average over `±neighbourhood` elements and clips negatives.
///
/// The average is always divided by the full window width, so values near the
/// edges are compared against a slightly smaller mean.
pub fn subtract_local_average(data: &mut [f64], neighbourhood: usize) {
    if data.is_empty() {
        return;
    }

    let width = (2 * neighbourhood + 1) as f64;
    let mut prefix = Vec::with_capacity(data.len() + 1);
    prefix.push(0.0);
    for x in data.iter() {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + x);
    }

    let len = data.len();
    let averages: Vec<f64> = (0..len)
        .map(|i| {
            let first = i.saturating_sub(neighbourhood);
            let last = (i + neighbourhood + 1).min(len);
            (prefix[last] - prefix[first]) / width
        })
        .collect();

    data.iter_mut()
        .zip(averages.iter())
        .for_each(|(d, avg)| *d = (*d - avg).max(0.0));
}

/// Index and value of the largest element. Ties resolve to the earliest index.
pub fn max(data: &[f64]) -> Option<(usize, f64)> {
    data.iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, x)| match best {
            Some((_, b)) if x <= b => best,
            _ => Some((i, x)),
        })
}

/// Scales `data` so its largest magnitude is 1. Data without any energy is
/// zeroed rather than divided.
pub fn normalize_max(data: &mut [f64]) {
    let max = data
        .iter()
        .map(|x| x.abs())
        .max_by(|a, b| a.total_cmp(b))
        .unwrap_or(0.0);
    if max > EPS {
        data.iter_mut().for_each(|x| *x /= max);
    } else {
        data.iter_mut().for_each(|x| *x = 0.0);
    }
}

/// Sub-sample offset of a peak from a parabola through three neighbouring values.
/// Returns 0 when the neighbourhood is flat or not a maximum.
pub fn parabolic_offset(left: f64, centre: f64, right: f64) -> f64 {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < EPS {
        return 0.0;
    }

    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

/// Log-normal weight of `bpm` around `centre`, with `octaves` as the standard deviation.
pub fn tempo_prior(bpm: f64, centre: f64, octaves: f64) -> f64 {
    let distance = (bpm.max(EPS) / centre).log2() / octaves;
    (-0.5 * distance * distance).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectified_diff_keeps_rises() {
        let diff = rectified_diff(&[1.0, 3.0, 2.0, 2.0, 5.0]);
        assert_eq!(diff, vec![0.0, 2.0, 0.0, 0.0, 3.0]);
        assert!(rectified_diff(&[]).is_empty());
    }

    #[test]
    fn local_average_isolates_peaks() {
        let mut data = vec![0.0; 21];
        data[10] = 21.0;
        subtract_local_average(&mut data, 10);

        assert_ulps_eq!(data[10], 20.0, epsilon = 1e-12);
        assert!(data
            .iter()
            .enumerate()
            .all(|(i, x)| i == 10 || *x == 0.0));
    }

    #[test]
    fn max_prefers_first() {
        assert_eq!(max(&[1.0, 4.0, 4.0, 2.0]), Some((1, 4.0)));
        assert_eq!(max(&[]), None);
    }

    #[test]
    fn unit_max_of_silence_is_silence() {
        let mut data = vec![0.0; 4];
        normalize_max(&mut data);
        assert_eq!(data, vec![0.0; 4]);

        let mut data = vec![1.0, -4.0, 2.0];
        normalize_max(&mut data);
        assert_eq!(data, vec![0.25, -1.0, 0.5]);
    }

    #[test]
    fn parabola_is_symmetric() {
        assert_eq!(parabolic_offset(1.0, 2.0, 1.0), 0.0);
        assert!(parabolic_offset(1.5, 2.0, 1.0) < 0.0);
        assert_eq!(parabolic_offset(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn prior_peaks_at_centre() {
        assert_ulps_eq!(tempo_prior(120.0, 120.0, 1.0), 1.0);
        assert_relative_eq!(
            tempo_prior(240.0, 120.0, 1.0),
            tempo_prior(60.0, 120.0, 1.0),
            epsilon = 1e-12
        );
        assert!(tempo_prior(300.0, 120.0, 1.0) < tempo_prior(200.0, 120.0, 1.0));
    }
}
