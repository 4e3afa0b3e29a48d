use super::{RemovalContext, RemovalError};
use crate::core::Raster;
use crate::render::AlphaMode;
use rand::seq::index;
use rand::Rng;

/// `partial` distinct indices out of `0..full`, in ascending order.
pub fn random_keep_indices<R: Rng + ?Sized>(
    full: usize,
    partial: usize,
    rng: &mut R,
) -> Result<Vec<usize>, RemovalError> {
    if partial > full {
        return Err(RemovalError::PartialExceedsFull { partial, full });
    }
    let mut keep = index::sample(rng, full, partial).into_vec();
    keep.sort_unstable();
    Ok(keep)
}

/// Keep `ctx.partial` strokes chosen uniformly, in their original z-order.
pub fn remove_random<R: Rng + ?Sized>(ctx: &RemovalContext<'_>, scale: u32, rng: &mut R) -> Result<Raster, RemovalError> {
    let keep = random_keep_indices(ctx.painting.len(), ctx.partial, rng)?;
    let partial = ctx.painting.keeping_strokes(&keep);
    Ok(partial.render(ctx.height * scale, ctx.width * scale, AlphaMode::Learned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_keep_indices_sorted_and_distinct() {
        let mut rng = StdRng::seed_from_u64(11);
        let keep = random_keep_indices(10, 4, &mut rng).unwrap();
        assert_eq!(keep.len(), 4);
        assert!(keep.windows(2).all(|w| w[0] < w[1]));
        assert!(keep.iter().all(|&i| i < 10));
    }

    #[test]
    fn test_keep_more_than_full_is_error() {
        let mut rng = StdRng::seed_from_u64(11);
        assert!(matches!(
            random_keep_indices(3, 4, &mut rng),
            Err(RemovalError::PartialExceedsFull { partial: 4, full: 3 })
        ));
        assert_eq!(random_keep_indices(3, 3, &mut rng).unwrap(), vec![0, 1, 2]);
    }
}
