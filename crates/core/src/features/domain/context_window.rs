use ndarray::{s, Array2, ArrayView2};

/// Concatenates each frame with its `context` neighbours on either side.
///
/// Row `t` of the result is frames `t-context ..= t+context` laid side by
/// side; indices outside the utterance repeat the first or last frame. The
/// output has the same number of rows and `(2 * context + 1) * D` columns.
pub fn splice(features: ArrayView2<'_, f32>, context: usize) -> Array2<f32> {
    let (frames, dim) = features.dim();
    let width = 2 * context + 1;
    let mut out = Array2::<f32>::zeros((frames, width * dim));
    if frames == 0 {
        return out;
    }

    let last = frames - 1;
    for t in 0..frames {
        for offset in 0..width {
            let source = (t + offset).saturating_sub(context).min(last);
            out.slice_mut(s![t, offset * dim..(offset + 1) * dim])
                .assign(&features.row(source));
        }
    }
    out
}
