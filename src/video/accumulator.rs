// H.264 decode accumulator
//
// Collects access units since the last reset. Parameter sets (SPS/PPS) are
// remembered separately and survive resets, so a reset buffer always starts
// with the configuration a decoder needs.

/// NAL unit type of a sequence parameter set
pub const NAL_SPS: u8 = 7;
/// NAL unit type of a picture parameter set
pub const NAL_PPS: u8 = 8;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Growing buffer of H.264 access units
#[derive(Debug, Default)]
pub struct DecodeAccumulator {
    buffer: Vec<u8>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    chunk_count: u32,
}

impl DecodeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one access unit, caching any parameter sets it carries
    pub fn push(&mut self, chunk: &[u8]) {
        for nal in nal_units(chunk) {
            match nal_type(nal) {
                Some(NAL_SPS) => self.sps = Some(nal.to_vec()),
                Some(NAL_PPS) => self.pps = Some(nal.to_vec()),
                _ => {}
            }
        }

        self.buffer.extend_from_slice(chunk);
        self.chunk_count += 1;
    }

    /// Drop everything except the cached parameter sets
    pub fn reset(&mut self) {
        self.buffer = self.header();
        self.chunk_count = 0;
    }

    /// Access units pushed since the last reset
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Bytes to hand to the decoder
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Cached SPS and PPS as an Annex-B byte stream (empty until seen)
    pub fn header(&self) -> Vec<u8> {
        let mut header = Vec::new();
        for nal in [&self.sps, &self.pps].into_iter().flatten() {
            header.extend_from_slice(&START_CODE);
            header.extend_from_slice(nal);
        }
        header
    }
}

/// Split an Annex-B byte stream into NAL units (start codes stripped)
pub fn nal_units(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (idx, &start) in starts.iter().enumerate() {
        let mut end = starts
            .get(idx + 1)
            .map(|&next| next - 3)
            .unwrap_or(data.len());
        // A 4-byte start code leaves one zero byte at the end of the previous unit
        while end > start && data[end - 1] == 0 && idx + 1 < starts.len() {
            end -= 1;
        }
        if end > start {
            units.push(&data[start..end]);
        }
    }
    units.into_iter()
}

/// NAL unit type from the first header byte
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1F, 0xAB];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00, 0x21];
    const SLICE: &[u8] = &[0x41, 0x9A, 0x02, 0x03];

    fn annexb(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(unit);
        }
        out
    }

    #[test]
    fn splits_nal_units() {
        let mut data = annexb(&[SPS, PPS]);
        // Three-byte start code form
        data.extend_from_slice(&[0, 0, 1]);
        data.extend_from_slice(IDR);

        let units: Vec<&[u8]> = nal_units(&data).collect();
        assert_eq!(units, vec![SPS, PPS, IDR]);
        assert_eq!(nal_type(units[0]), Some(NAL_SPS));
        assert_eq!(nal_type(units[1]), Some(NAL_PPS));
        assert_eq!(nal_type(units[2]), Some(5));
    }

    #[test]
    fn parameter_sets_survive_reset() {
        let mut acc = DecodeAccumulator::new();
        acc.push(&annexb(&[SPS, PPS, IDR]));
        acc.push(&annexb(&[SLICE]));
        assert_eq!(acc.chunk_count(), 2);
        assert_eq!(acc.header(), annexb(&[SPS, PPS]));

        acc.reset();
        assert_eq!(acc.chunk_count(), 0);
        assert_eq!(acc.data(), annexb(&[SPS, PPS]).as_slice());

        // A reset again keeps the header, not the slices pushed in between
        acc.push(&annexb(&[SLICE]));
        acc.reset();
        assert_eq!(acc.data(), annexb(&[SPS, PPS]).as_slice());
    }

    #[test]
    fn reset_before_parameter_sets_is_empty() {
        let mut acc = DecodeAccumulator::new();
        acc.push(&annexb(&[SLICE]));
        acc.reset();
        assert!(acc.data().is_empty());
        assert!(acc.header().is_empty());
    }

    #[test]
    fn newer_parameter_sets_replace_older() {
        let sps2: &[u8] = &[0x67, 0x64, 0x00, 0x28];
        let mut acc = DecodeAccumulator::new();
        acc.push(&annexb(&[SPS, PPS, IDR]));
        acc.push(&annexb(&[sps2, PPS, IDR]));
        acc.reset();
        assert_eq!(acc.data(), annexb(&[sps2, PPS]).as_slice());
    }
}
