use serde::{Deserialize, Serialize};

/// Static channel permutation applied to interleaved frames.
///
/// `order[target] = source`: output channel `target` takes input channel
/// `order[target]`. Only permutations are allowed, so no channel is mixed,
/// duplicated or dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct ChannelMap {
    order: Vec<usize>,
}

impl ChannelMap {
    /// Builds a map from an explicit order, rejecting anything that is not a permutation.
    pub fn from_order(order: Vec<usize>) -> Result<Self, String> {
        if order.is_empty() {
            return Err("channel map must cover at least one channel".into());
        }
        let mut seen = vec![false; order.len()];
        for &source in &order {
            if source >= order.len() {
                return Err(format!(
                    "channel index {} out of range for {} channels",
                    source,
                    order.len()
                ));
            }
            if seen[source] {
                return Err(format!("channel index {} used twice", source));
            }
            seen[source] = true;
        }
        Ok(Self { order })
    }

    pub fn identity(channels: usize) -> Self {
        Self {
            order: (0..channels.max(1)).collect(),
        }
    }

    /// WAV/WASAPI 5.1 (L R C LFE SL SR) to A/52 (L C R SL SR LFE).
    pub fn wav_5_1_to_a52() -> Self {
        Self {
            order: vec![0, 2, 1, 4, 5, 3],
        }
    }

    pub fn channels(&self) -> usize {
        self.order.len()
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn is_identity(&self) -> bool {
        self.order.iter().enumerate().all(|(target, &source)| target == source)
    }

    /// Appends `input` (whole interleaved frames) to `output` in target order.
    ///
    /// A trailing partial frame is ignored.
    pub fn remap_into<T: Copy>(&self, input: &[T], output: &mut Vec<T>) {
        let channels = self.order.len();
        output.reserve(input.len() - input.len() % channels);
        for frame in input.chunks_exact(channels) {
            output.extend(self.order.iter().map(|&source| frame[source]));
        }
    }

    /// Reorders whole interleaved frames of `samples` in place.
    pub fn remap_in_place<T: Copy + Default>(&self, samples: &mut [T]) {
        if self.is_identity() {
            return;
        }
        let channels = self.order.len();
        let mut scratch = vec![T::default(); channels];
        for frame in samples.chunks_exact_mut(channels) {
            scratch.copy_from_slice(frame);
            for (target, &source) in self.order.iter().enumerate() {
                frame[target] = scratch[source];
            }
        }
    }
}

impl TryFrom<Vec<usize>> for ChannelMap {
    type Error = String;

    fn try_from(order: Vec<usize>) -> Result<Self, Self::Error> {
        Self::from_order(order)
    }
}

impl From<ChannelMap> for Vec<usize> {
    fn from(map: ChannelMap) -> Self {
        map.order
    }
}
