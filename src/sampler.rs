//! Collects one channel's samples into fixed-size blocks for the analyzer.

use crate::fifo::{fifo, FifoConsumer, FifoProducer};

/// Audio-thread half: chops incoming samples into blocks and queues them.
pub struct ChannelSampler {
    block: Vec<f32>,
    filled: usize,
    queue: FifoProducer<Vec<f32>>,
    prepared: bool,
}

/// Analyzer half: pulls completed blocks.
pub struct SampledBlocks {
    queue: FifoConsumer<Vec<f32>>,
}

/// Creates a connected sampler pair. Call [`ChannelSampler::prepare`] before use.
pub fn single_channel_sampler() -> (ChannelSampler, SampledBlocks) {
    let (producer, consumer) = fifo(Vec::new());
    (
        ChannelSampler {
            block: Vec::new(),
            filled: 0,
            queue: producer,
            prepared: false,
        },
        SampledBlocks { queue: consumer },
    )
}

impl ChannelSampler {
    /// Sizes the working block and every free queue slot to `block_size`.
    ///
    /// Allocates, so call it outside the audio callback.
    pub fn prepare(&mut self, block_size: usize) {
        let block_size = block_size.max(1);
        self.block.clear();
        self.block.resize(block_size, 0.0);
        self.filled = 0;
        self.queue.prepare_free_slots(|slot| {
            slot.clear();
            slot.resize(block_size, 0.0);
        });
        self.prepared = true;
    }

    pub fn block_size(&self) -> usize {
        self.block.len()
    }

    /// Appends `samples`; every time the block fills it is pushed and the cursor
    /// restarts at zero. A full queue drops the block.
    pub fn update(&mut self, samples: &[f32]) {
        debug_assert!(self.prepared, "ChannelSampler::update called before prepare");
        if !self.prepared {
            return;
        }

        let mut remaining = samples;
        while !remaining.is_empty() {
            let space = self.block.len() - self.filled;
            let take = space.min(remaining.len());
            self.block[self.filled..self.filled + take].copy_from_slice(&remaining[..take]);
            self.filled += take;
            remaining = &remaining[take..];

            if self.filled == self.block.len() {
                self.queue.push(&self.block);
                self.filled = 0;
            }
        }
    }
}

impl SampledBlocks {
    pub fn num_complete_blocks_available(&self) -> usize {
        self.queue.num_available()
    }

    /// Copies the oldest complete block into `out`.
    pub fn pull(&mut self, out: &mut Vec<f32>) -> bool {
        self.queue.pull(out)
    }

    /// Throws away every queued block. Returns how many there were.
    pub fn discard_all(&mut self) -> usize {
        self.queue.clear()
    }

    /// Blocks lost because the queue was full.
    pub fn dropped_blocks(&self) -> usize {
        self.queue.dropped()
    }
}
