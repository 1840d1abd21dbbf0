use burn::prelude::*;
use burn::tensor::TensorData;

use crate::env::{AlphaState, MAX_EXPR_LENGTH};
use crate::expr::SIZE_ACTION;

/// Vocabulary per token slot: every action plus the empty marker.
const SLOT_VOCAB: usize = SIZE_ACTION + 1;

/// Width of an encoded observation.
pub const OBS_DIM: usize = MAX_EXPR_LENGTH * SLOT_VOCAB;

/// Encode one observation as a tensor of shape [1, OBS_DIM].
///
/// Each of the `MAX_EXPR_LENGTH` slots is one-hot over the empty marker (index 0)
/// and the actions shifted by one.
pub fn encode_state<B: Backend>(state: &AlphaState, device: &B::Device) -> Tensor<B, 2> {
    encode_states_batch(std::slice::from_ref(state), device)
}

/// Encode observations as a batched tensor of shape [batch, OBS_DIM].
pub fn encode_states_batch<B: Backend>(states: &[AlphaState], device: &B::Device) -> Tensor<B, 2> {
    let mut flat = vec![0.0f32; states.len() * OBS_DIM];
    for (row, state) in flat.chunks_mut(OBS_DIM).zip(states) {
        encode_into(state, row);
    }
    Tensor::<B, 1>::from_data(TensorData::from(flat.as_slice()), device)
        .reshape([states.len() as i32, OBS_DIM as i32])
}

/// Additive logit mask: 0 for legal actions, -1e9 otherwise. Shape [batch, SIZE_ACTION].
pub fn legal_mask_batch<B: Backend>(states: &[AlphaState], device: &B::Device) -> Tensor<B, 2> {
    let data: Vec<f32> = states
        .iter()
        .flat_map(|s| s.mask.iter().map(|&ok| if ok { 0.0 } else { -1e9 }))
        .collect();
    Tensor::<B, 1>::from_data(TensorData::from(data.as_slice()), device)
        .reshape([states.len() as i32, SIZE_ACTION as i32])
}

/// Copy a tensor's values to the host, converting to f32.
pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}

fn encode_into(state: &AlphaState, row: &mut [f32]) {
    for (slot, &token) in state.tokens.iter().take(MAX_EXPR_LENGTH).enumerate() {
        row[slot * SLOT_VOCAB + token.min(SIZE_ACTION)] = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn state_with(tokens: &[usize]) -> AlphaState {
        let mut slots = vec![0; MAX_EXPR_LENGTH];
        slots[..tokens.len()].copy_from_slice(tokens);
        AlphaState {
            tokens: slots,
            mask: vec![true; SIZE_ACTION],
        }
    }

    #[test]
    fn test_encode_shape_and_one_hot() {
        let device = Default::default();
        let tensor = encode_state::<TestBackend>(&state_with(&[5, 12]), &device);
        assert_eq!(tensor.shape().dims, [1, OBS_DIM]);
        let data: Vec<f32> = tensor.into_data().to_vec().unwrap();

        assert_eq!(data[5], 1.0);
        assert_eq!(data[SLOT_VOCAB + 12], 1.0);
        // remaining slots carry the empty marker
        assert_eq!(data[2 * SLOT_VOCAB], 1.0);
        assert_eq!(data.iter().sum::<f32>(), MAX_EXPR_LENGTH as f32);
    }

    #[test]
    fn test_encode_batch() {
        let device = Default::default();
        let batch = encode_states_batch::<TestBackend>(&[state_with(&[]), state_with(&[1])], &device);
        assert_eq!(batch.shape().dims, [2, OBS_DIM]);
    }

    #[test]
    fn test_legal_mask() {
        let device = Default::default();
        let mut state = state_with(&[]);
        state.mask[3] = false;
        let mask = legal_mask_batch::<TestBackend>(&[state], &device);
        let data: Vec<f32> = mask.into_data().to_vec().unwrap();
        assert_eq!(data[0], 0.0);
        assert_eq!(data[3], -1e9);
    }
}
