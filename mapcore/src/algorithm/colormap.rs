use nalgebra::DMatrix;

// (t, r, g, b) samples of matplotlib's viridis table at every 32nd entry
const VIRIDIS_ANCHORS: [(f64, f64, f64, f64); 9] = [
    (0.000, 0.267004, 0.004874, 0.329415),
    (0.125, 0.282623, 0.140926, 0.457517),
    (0.250, 0.229739, 0.322361, 0.545706),
    (0.375, 0.172719, 0.448791, 0.557885),
    (0.500, 0.127568, 0.566949, 0.550556),
    (0.625, 0.166383, 0.690856, 0.496502),
    (0.750, 0.477504, 0.821444, 0.318195),
    (0.875, 0.741388, 0.873449, 0.149561),
    (1.000, 0.993248, 0.906157, 0.143936),
];

/// Viridis color at `t` in [0, 1], channels in [0, 1].
pub fn viridis(t: f64) -> [f64; 3] {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let mut i = 0;
    while i + 2 < VIRIDIS_ANCHORS.len() && VIRIDIS_ANCHORS[i + 1].0 < t {
        i += 1;
    }
    let (t0, r0, g0, b0) = VIRIDIS_ANCHORS[i];
    let (t1, r1, g1, b1) = VIRIDIS_ANCHORS[i + 1];
    let frac = (t - t0) / (t1 - t0);
    [
        r0 + frac * (r1 - r0),
        g0 + frac * (g1 - g0),
        b0 + frac * (b1 - b0),
    ]
}

/// `n` colors evenly sampled from viridis, scaled to 0–255, one row per cluster.
///
/// Cluster 0 takes the dark end and cluster `n - 1` the bright end, so the
/// color order follows the label order.
pub fn viridis_lut(n: usize) -> DMatrix<f64> {
    let mut lut = DMatrix::<f64>::zeros(n, 3);
    for k in 0..n {
        let t = if n > 1 { k as f64 / (n - 1) as f64 } else { 0.0 };
        let rgb = viridis(t);
        for c in 0..3 {
            lut[(k, c)] = rgb[c] * 255.0;
        }
    }
    lut
}
