/// Fixed-capacity sample ring for audio awaiting the next upstream flush.
///
/// Storage is allocated once; `push_slice` overwrites the oldest samples when
/// the ring is full and reports how many were lost.
#[derive(Debug, Clone)]
pub struct SampleRing {
    buf: Box<[f32]>,
    read: usize,
    write: usize,
    len: usize,
}

impl SampleRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity.max(1)].into_boxed_slice(),
            read: 0,
            write: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Append samples; returns the number of old samples overwritten
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        let cap = self.buf.len();
        let mut overwritten = 0;

        // Only the newest `cap` samples can survive
        let samples = if samples.len() > cap {
            overwritten += samples.len() - cap;
            &samples[samples.len() - cap..]
        } else {
            samples
        };

        for &sample in samples {
            self.buf[self.write] = sample;
            self.write = (self.write + 1) % cap;
            if self.len == cap {
                self.read = (self.read + 1) % cap;
                overwritten += 1;
            } else {
                self.len += 1;
            }
        }

        overwritten
    }

    /// Move everything buffered into `out`, oldest first
    pub fn drain_into(&mut self, out: &mut Vec<f32>) {
        let cap = self.buf.len();
        out.reserve(self.len);

        let first = (cap - self.read).min(self.len);
        out.extend_from_slice(&self.buf[self.read..self.read + first]);
        out.extend_from_slice(&self.buf[..self.len - first]);

        self.read = self.write;
        self.len = 0;
    }

    pub fn drain(&mut self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len);
        self.drain_into(&mut out);
        out
    }

    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.len = 0;
    }
}
