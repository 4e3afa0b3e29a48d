use super::{RemovalConfig, RemovalContext, RemovalError};
use crate::core::{Mask, Raster, ScalarMap};
use crate::render::AlphaMode;
use crate::score::SaliencyScorer;

/// Revert a caption-salient region of the opaque final render to background.
///
/// With `keep_salient` the non-salient region is reverted instead. Returns the
/// start canvas, the attention map and the salience mask, all at
/// `scale ×` the planning resolution.
pub fn remove_by_salience(
    ctx: &RemovalContext<'_>,
    scorer: &dyn SaliencyScorer,
    cfg: &RemovalConfig,
    keep_salient: bool,
) -> Result<(Raster, ScalarMap, Mask), RemovalError> {
    let (h, w) = (ctx.height * cfg.scale, ctx.width * cfg.scale);

    let attention = scorer.attention(ctx.target, ctx.caption)?.resize(w, h);
    let salient = attention.threshold(cfg.saliency_threshold);

    let mut start = ctx.painting.render(h, w, AlphaMode::Opaque);
    let background = ctx.painting.background_at(h, w);
    if keep_salient {
        start.copy_masked_from(&background, &salient.inverted());
    } else {
        start.copy_masked_from(&background, &salient);
    }
    Ok((start, attention, salient))
}
