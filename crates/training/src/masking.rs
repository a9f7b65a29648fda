use burn::tensor::{backend::Backend, Tensor};

/// Zero out prediction and target outside the foreground mask.
///
/// `mask` is `[N, 1, H, W]` and is repeated across the class axis.
pub fn apply_mask<B: Backend>(
    prediction: Tensor<B, 4>,
    labels: Tensor<B, 4>,
    mask: Tensor<B, 4>,
) -> (Tensor<B, 4>, Tensor<B, 4>) {
    let classes = prediction.dims()[1];
    let mask = mask.repeat_dim(1, classes);
    (prediction * mask.clone(), labels * mask)
}
