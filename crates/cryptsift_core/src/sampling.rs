use crate::config::SamplingConfig;

#[derive(Debug, Clone)]
struct Window {
    start: u64,
    len: usize,
    data: Vec<u8>,
}

impl Window {
    #[inline]
    fn end(&self) -> u64 {
        self.start + self.len as u64
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.data.len() >= self.len
    }
}

pub struct SampleCollector {
    windows: Vec<Window>,
    cursor: usize,
}

impl SampleCollector {
    pub fn new(stream_len: u64, sampling: &SamplingConfig) -> Self {
        Self::with_windows(stream_len, sampling.window_size, sampling.window_count)
    }

    pub fn with_windows(stream_len: u64, window_size: usize, window_count: usize) -> Self {
        let size = window_size.max(1) as u64;
        let count = window_count.max(1) as u64;

        let windows = if stream_len <= size.saturating_mul(count) {
            (0..stream_len)
                .step_by(size as usize)
                .map(|start| window(start, size.min(stream_len - start)))
                .collect()
        } else if count == 1 {
            vec![window(0, size)]
        } else {
            let span = stream_len - size;
            (0..count)
                .map(|i| {
                    let start = ((span as u128 * i as u128) / (count - 1) as u128) as u64;
                    window(start, size)
                })
                .collect()
        };

        Self { windows, cursor: 0 }
    }

    pub fn feed(&mut self, offset: u64, data: &[u8]) {
        let end = offset + data.len() as u64;
        for window in &mut self.windows[self.cursor..] {
            if window.start >= end {
                break;
            }
            if window.end() <= offset || window.is_full() {
                continue;
            }
            let from = window.start.max(offset).max(window.start + window.data.len() as u64);
            let to = window.end().min(end);
            if from < to {
                window
                    .data
                    .extend_from_slice(&data[(from - offset) as usize..(to - offset) as usize]);
            }
        }
        while self.cursor < self.windows.len() && self.windows[self.cursor].is_full() {
            self.cursor += 1;
        }
    }

    pub fn finish(self) -> Sample {
        Sample {
            windows: self
                .windows
                .into_iter()
                .map(|w| w.data)
                .filter(|data| !data.is_empty())
                .collect(),
        }
    }
}

fn window(start: u64, len: u64) -> Window {
    Window {
        start,
        len: len as usize,
        data: Vec::with_capacity(len as usize),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    windows: Vec<Vec<u8>>,
}

impl Sample {
    pub fn from_windows(windows: Vec<Vec<u8>>) -> Self {
        Self { windows }
    }

    #[inline]
    pub fn windows(&self) -> &[Vec<u8>] {
        &self.windows
    }

    pub fn total_len(&self) -> usize {
        self.windows.iter().map(Vec::len).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    pub fn prefix(&self, max: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(max.min(self.total_len()));
        for window in &self.windows {
            let take = (max - out.len()).min(window.len());
            out.extend_from_slice(&window[..take]);
            if out.len() == max {
                break;
            }
        }
        out
    }
}
