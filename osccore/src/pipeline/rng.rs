use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Independent random streams of one pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Holdout = 1,
    InnerSplit = 2,
    Clustering = 3,
    Bootstrap = 4,
}

#[inline]
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed for unit (`outer`, `inner`) of `stream`, so parallel units never share
/// state and results do not depend on scheduling.
pub fn derive_seed(master: u64, stream: Stream, outer: u64, inner: u64) -> u64 {
    let mut h = splitmix64(master);
    h = splitmix64(h ^ stream as u64);
    h = splitmix64(h ^ outer);
    splitmix64(h ^ inner)
}

pub fn unit_rng(master: u64, stream: Stream, outer: u64, inner: u64) -> StdRng {
    StdRng::seed_from_u64(derive_seed(master, stream, outer, inner))
}

/// Shuffled train/test split of `indices`; the test part holds
/// `ceil(test_fraction * n)` entries, the train part the rest.
pub fn shuffle_split(indices: &[usize], test_fraction: f64, rng: &mut StdRng) -> (Vec<usize>, Vec<usize>) {
    let n = indices.len();
    let n_test = ((test_fraction * n as f64).ceil() as usize).min(n);
    let mut shuffled = indices.to_vec();
    shuffled.shuffle(rng);
    let test = shuffled.split_off(n - n_test);
    (shuffled, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_differ() {
        let a = derive_seed(1, Stream::Holdout, 0, 0);
        let b = derive_seed(1, Stream::InnerSplit, 0, 0);
        let c = derive_seed(1, Stream::Holdout, 1, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, derive_seed(1, Stream::Holdout, 0, 0));
    }

    #[test]
    fn test_shuffle_split_sizes() {
        let idx: Vec<usize> = (0..50).collect();
        let mut rng = unit_rng(3, Stream::Holdout, 0, 0);
        let (train, test) = shuffle_split(&idx, 0.2, &mut rng);
        assert_eq!(train.len(), 40);
        assert_eq!(test.len(), 10);

        let mut all: Vec<usize> = train.iter().chain(test.iter()).copied().collect();
        all.sort();
        assert_eq!(all, idx);
    }
}
