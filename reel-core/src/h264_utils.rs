//! H.264 NAL unit utilities
//!
//! MP4 and MKV store H.264 as AVCC (length-prefixed NAL units), openh264
//! wants Annex B (start codes). These helpers rewrite between the two and
//! pull SPS/PPS out of the avcC configuration record.

/// Annex B start code (4-byte version)
const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Parameter sets and NAL length size from an avcC record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    /// SPS and PPS NAL units with start codes
    pub parameter_sets: Vec<u8>,
    pub nal_length_size: usize,
}

/// Convert AVCC format NAL units to Annex B format into a reused buffer.
/// Returns the number of NAL units written.
///
/// AVCC: [N-byte length][NAL][N-byte length][NAL]...
/// Annex B: [0x00 0x00 0x00 0x01][NAL][0x00 0x00 0x00 0x01][NAL]...
pub fn avcc_to_annexb_into(data: &[u8], nal_length_size: usize, out: &mut Vec<u8>) -> usize {
    out.clear();
    if data.is_empty() || nal_length_size == 0 || nal_length_size > 4 {
        out.extend_from_slice(data);
        return 0;
    }

    let mut offset = 0;
    let mut units = 0;

    while offset + nal_length_size <= data.len() {
        let nal_len = read_be_uint(&data[offset..offset + nal_length_size]);
        offset += nal_length_size;

        if nal_len == 0 || offset + nal_len > data.len() {
            break;
        }

        out.extend_from_slice(&ANNEX_B_START_CODE);
        out.extend_from_slice(&data[offset..offset + nal_len]);
        offset += nal_len;
        units += 1;
    }

    units
}

/// Parse AVCC (avcC) extradata and extract SPS/PPS as Annex B
pub fn parse_avcc_extradata(extradata: &[u8]) -> Option<AvcConfig> {
    // [0]: version (always 1)
    // [1]: profile
    // [2]: profile compat
    // [3]: level
    // [4]: 0xFC | (nal_length_size - 1)
    // [5]: 0xE0 | num_sps
    // SPS entries, then num_pps, then PPS entries
    if extradata.len() < 7 || extradata[0] != 1 {
        return None;
    }

    let nal_length_size = ((extradata[4] & 0x03) + 1) as usize;
    let num_sps = (extradata[5] & 0x1F) as usize;

    let mut parameter_sets = Vec::with_capacity(extradata.len() + 32);
    let mut offset = 6;

    for _ in 0..num_sps {
        let (nal, next) = read_parameter_set(extradata, offset)?;
        parameter_sets.extend_from_slice(&ANNEX_B_START_CODE);
        parameter_sets.extend_from_slice(nal);
        offset = next;
    }

    if let Some(&num_pps) = extradata.get(offset) {
        offset += 1;
        for _ in 0..num_pps {
            // A short PPS list still leaves a usable SPS
            let Some((nal, next)) = read_parameter_set(extradata, offset) else {
                break;
            };
            parameter_sets.extend_from_slice(&ANNEX_B_START_CODE);
            parameter_sets.extend_from_slice(nal);
            offset = next;
        }
    }

    Some(AvcConfig {
        parameter_sets,
        nal_length_size,
    })
}

/// 16-bit length followed by a NAL unit
fn read_parameter_set(data: &[u8], offset: usize) -> Option<(&[u8], usize)> {
    let len_bytes = data.get(offset..offset + 2)?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let start = offset + 2;
    let nal = data.get(start..start + len)?;
    Some((nal, start + len))
}

/// Check if data already has Annex B start codes
pub fn is_annexb(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 0, 1]) || data.starts_with(&[0, 0, 1])
}

/// Read big-endian unsigned integer of 1-4 bytes
fn read_be_uint(data: &[u8]) -> usize {
    data.iter().fold(0usize, |val, &b| (val << 8) | b as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    // avcC: version 1, High profile, 4-byte lengths, one SPS, one PPS
    const AVCC_RECORD: &[u8] = &[
        0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, //
        0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, // SPS
        0x01, //
        0x00, 0x03, 0x68, 0xEE, 0x3C, // PPS
    ];

    #[test]
    fn test_avcc_to_annexb() {
        // 4-byte length prefix: length=5, NAL data = [0x67, 0x42, 0x00, 0x1e, 0x9a]
        let avcc = vec![0x00, 0x00, 0x00, 0x05, 0x67, 0x42, 0x00, 0x1e, 0x9a];
        let mut annexb = Vec::new();
        assert_eq!(avcc_to_annexb_into(&avcc, 4, &mut annexb), 1);

        assert_eq!(&annexb[0..4], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&annexb[4..], &[0x67, 0x42, 0x00, 0x1e, 0x9a]);
    }

    #[test]
    fn converts_multiple_units_with_short_lengths() {
        let avcc = [0x00, 0x02, 0x65, 0x88, 0x00, 0x01, 0x06];
        let mut out = vec![0xAA; 3];
        let units = avcc_to_annexb_into(&avcc, 2, &mut out);

        assert_eq!(units, 2);
        assert_eq!(out, vec![0, 0, 0, 1, 0x65, 0x88, 0, 0, 0, 1, 0x06]);
    }

    #[test]
    fn truncated_unit_is_dropped() {
        let avcc = [0x00, 0x00, 0x00, 0x09, 0x65, 0x88];
        let mut out = Vec::new();
        assert_eq!(avcc_to_annexb_into(&avcc, 4, &mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn invalid_length_size_passes_data_through() {
        let data = [1, 2, 3];
        let mut out = Vec::new();
        assert_eq!(avcc_to_annexb_into(&data, 0, &mut out), 0);
        assert_eq!(out, data.to_vec());
    }

    #[test]
    fn extracts_parameter_sets() {
        let config = parse_avcc_extradata(AVCC_RECORD).unwrap();
        assert_eq!(config.nal_length_size, 4);
        assert_eq!(
            config.parameter_sets,
            vec![0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1F, 0, 0, 0, 1, 0x68, 0xEE, 0x3C]
        );
    }

    #[test]
    fn rejects_bad_records() {
        assert!(parse_avcc_extradata(&[0x01, 0x64]).is_none());
        let mut wrong_version = AVCC_RECORD.to_vec();
        wrong_version[0] = 2;
        assert!(parse_avcc_extradata(&wrong_version).is_none());
        // SPS length runs past the end
        assert!(parse_avcc_extradata(&AVCC_RECORD[..9]).is_none());
    }

    #[test]
    fn test_is_annexb() {
        assert!(is_annexb(&[0x00, 0x00, 0x00, 0x01, 0x67]));
        assert!(is_annexb(&[0x00, 0x00, 0x01, 0x67]));
        assert!(!is_annexb(&[0x00, 0x00, 0x00, 0x05, 0x67])); // AVCC
    }
}
