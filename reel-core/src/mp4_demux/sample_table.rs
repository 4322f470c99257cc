//! MP4 sample table data structures.

/// Raw `stbl` contents of one track
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub sample_sizes: Vec<u32>,
    pub chunk_offsets: Vec<u64>,
    pub sample_to_chunk: Vec<(u32, u32, u32)>, // first_chunk, samples_per_chunk, sample_desc_index
    pub time_to_sample: Vec<(u32, u32)>,       // sample_count, sample_delta
    pub keyframes: Vec<u32>,                   // 1-based sample numbers (stss)
    pub composition_offsets: Vec<(u32, i32)>,  // sample_count, offset
}

/// One fully resolved sample, timestamps in track timescale units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub offset: u64,
    pub size: u32,
    pub dts: i64,
    pub pts: i64,
    pub duration: u32,
    pub keyframe: bool,
}

impl SampleTable {
    pub fn sample_count(&self) -> usize {
        self.sample_sizes.len()
    }

    /// Flatten the run-length tables into a per-sample index
    pub fn build_samples(&self) -> Result<Vec<Sample>, String> {
        let count = self.sample_count();
        if count == 0 {
            return Ok(Vec::new());
        }

        let offsets = self.sample_offsets()?;

        // stts: decode deltas; a short table repeats its last delta
        let mut durations = Vec::with_capacity(count);
        for &(run, delta) in &self.time_to_sample {
            for _ in 0..run {
                if durations.len() == count {
                    break;
                }
                durations.push(delta);
            }
        }
        let fill = durations.last().copied().unwrap_or(0);
        durations.resize(count, fill);

        // ctts: composition offsets, zero when absent
        let mut composition = Vec::with_capacity(count);
        for &(run, offset) in &self.composition_offsets {
            for _ in 0..run {
                if composition.len() == count {
                    break;
                }
                composition.push(offset);
            }
        }
        composition.resize(count, 0);

        // stss: no table means every sample is a sync sample
        let mut keyframe = vec![self.keyframes.is_empty(); count];
        for &number in &self.keyframes {
            if number >= 1 && (number as usize) <= count {
                keyframe[number as usize - 1] = true;
            }
        }

        let mut samples = Vec::with_capacity(count);
        let mut dts = 0i64;
        for i in 0..count {
            samples.push(Sample {
                offset: offsets[i],
                size: self.sample_sizes[i],
                dts,
                pts: dts + composition[i] as i64,
                duration: durations[i],
                keyframe: keyframe[i],
            });
            dts += durations[i] as i64;
        }

        Ok(samples)
    }

    fn sample_offsets(&self) -> Result<Vec<u64>, String> {
        let count = self.sample_count();
        let stsc = &self.sample_to_chunk;
        let stco = &self.chunk_offsets;

        if stsc.is_empty() || stco.is_empty() {
            return Err("Sample table has no chunk mapping".to_string());
        }

        let mut offsets = Vec::with_capacity(count);
        let mut sample = 0usize;

        for (i, &(first_chunk, samples_per_chunk, _)) in stsc.iter().enumerate() {
            if first_chunk == 0 {
                return Err("stsc chunk numbers are 1-based".to_string());
            }
            let first = first_chunk as usize - 1;
            let next_first = match stsc.get(i + 1) {
                Some(&(next, _, _)) => (next as usize).saturating_sub(1),
                None => stco.len(),
            };

            for chunk in first..next_first.min(stco.len()) {
                let mut offset = stco[chunk];
                for _ in 0..samples_per_chunk {
                    if sample == count {
                        return Ok(offsets);
                    }
                    offsets.push(offset);
                    offset = offset.saturating_add(self.sample_sizes[sample] as u64);
                    sample += 1;
                }
            }
        }

        if offsets.len() < count {
            return Err(format!(
                "Chunk table covers {} of {} samples",
                offsets.len(),
                count
            ));
        }
        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SampleTable {
        SampleTable {
            sample_sizes: vec![10, 20, 30, 40, 50],
            chunk_offsets: vec![1000, 2000],
            // chunk 1 holds 3 samples, chunk 2 holds the rest
            sample_to_chunk: vec![(1, 3, 1), (2, 2, 1)],
            time_to_sample: vec![(5, 512)],
            keyframes: vec![1, 4],
            composition_offsets: vec![(1, 1024), (4, 0)],
        }
    }

    #[test]
    fn resolves_offsets_across_chunks() {
        let samples = table().build_samples().unwrap();
        let offsets: Vec<u64> = samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![1000, 1010, 1030, 2000, 2040]);
    }

    #[test]
    fn applies_deltas_and_composition_offsets() {
        let samples = table().build_samples().unwrap();
        assert_eq!(samples[0].dts, 0);
        assert_eq!(samples[0].pts, 1024);
        assert_eq!(samples[3].dts, 3 * 512);
        assert_eq!(samples[3].pts, 3 * 512);
        assert!(samples.iter().all(|s| s.duration == 512));
    }

    #[test]
    fn marks_sync_samples() {
        let samples = table().build_samples().unwrap();
        let keys: Vec<bool> = samples.iter().map(|s| s.keyframe).collect();
        assert_eq!(keys, vec![true, false, false, true, false]);
    }

    #[test]
    fn missing_stss_means_all_sync() {
        let mut t = table();
        t.keyframes.clear();
        assert!(t.build_samples().unwrap().iter().all(|s| s.keyframe));
    }

    #[test]
    fn short_stts_repeats_last_delta() {
        let mut t = table();
        t.time_to_sample = vec![(2, 100)];
        let samples = t.build_samples().unwrap();
        assert_eq!(samples[4].dts, 400);
    }

    #[test]
    fn missing_chunks_are_an_error() {
        let mut t = table();
        t.chunk_offsets.truncate(1);
        assert!(t.build_samples().unwrap_err().contains("covers 3 of 5"));
    }

    #[test]
    fn empty_table_builds_nothing() {
        assert!(SampleTable::default().build_samples().unwrap().is_empty());
    }
}
