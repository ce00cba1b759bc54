// THEORY:
// Each cluster label is painted in its own color, and the colors must stay
// distinguishable from each other and from the background. The palette is
// built greedily: every new color is the best of a batch of random candidates,
// where "best" means farthest from everything already chosen. Black and white
// are seeded as already taken, so no label is painted close to either extreme.
//
// The generator is seeded by the run seed, so a run always paints label `k`
// in the same color.

pub mod palette {
    use image::Rgb;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Random candidates examined for each palette entry.
    const CANDIDATES_PER_COLOR: usize = 256;

    const EXCLUDED: [Rgb<u8>; 2] = [Rgb([0, 0, 0]), Rgb([255, 255, 255])];

    /// Returns `count` mutually distinct colors, deterministic in `seed`.
    pub fn distinct_colors(count: usize, seed: u64) -> Vec<Rgb<u8>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut taken: Vec<Rgb<u8>> = EXCLUDED.to_vec();
        let mut colors = Vec::with_capacity(count);

        for _ in 0..count {
            let mut best = random_color(&mut rng);
            let mut best_distance = min_distance(best, &taken);
            for _ in 1..CANDIDATES_PER_COLOR {
                let candidate = random_color(&mut rng);
                let distance = min_distance(candidate, &taken);
                if distance > best_distance {
                    best = candidate;
                    best_distance = distance;
                }
            }
            taken.push(best);
            colors.push(best);
        }
        colors
    }

    fn random_color<R: Rng>(rng: &mut R) -> Rgb<u8> {
        Rgb([
            rng.random_range(0..=255),
            rng.random_range(0..=255),
            rng.random_range(0..=255),
        ])
    }

    fn min_distance(color: Rgb<u8>, taken: &[Rgb<u8>]) -> f64 {
        taken
            .iter()
            .map(|other| color_distance(color, *other))
            .fold(f64::INFINITY, f64::min)
    }

    /// Weighted RGB ("redmean") distance, a cheap approximation of perceived difference.
    pub fn color_distance(a: Rgb<u8>, b: Rgb<u8>) -> f64 {
        let mean_red = (a[0] as f64 + b[0] as f64) / 2.0;
        let dr = a[0] as f64 - b[0] as f64;
        let dg = a[1] as f64 - b[1] as f64;
        let db = a[2] as f64 - b[2] as f64;
        ((2.0 + mean_red / 256.0) * dr * dr + 4.0 * dg * dg + (2.0 + (255.0 - mean_red) / 256.0) * db * db).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::palette::*;
    use image::Rgb;

    #[test]
    fn palette_is_deterministic() {
        assert_eq!(distinct_colors(8, 7), distinct_colors(8, 7));
        assert_ne!(distinct_colors(8, 7), distinct_colors(8, 8));
    }

    #[test]
    fn palette_has_requested_size() {
        assert!(distinct_colors(0, 1).is_empty());
        assert_eq!(distinct_colors(5, 1).len(), 5);
    }

    #[test]
    fn colors_are_separated_from_each_other_and_the_background() {
        let colors = distinct_colors(8, 7);
        let black = Rgb([0, 0, 0]);
        for (i, a) in colors.iter().enumerate() {
            assert!(color_distance(*a, black) > 100.0, "{a:?} too dark");
            for b in &colors[i + 1..] {
                assert!(color_distance(*a, *b) > 50.0, "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_identity() {
        let a = Rgb([10, 200, 30]);
        let b = Rgb([250, 5, 90]);
        assert_eq!(color_distance(a, a), 0.0);
        assert!((color_distance(a, b) - color_distance(b, a)).abs() < 1e-9);
    }
}
