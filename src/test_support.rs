//! WAV fixtures shared by unit tests.

use std::io::Cursor;

/// Mono 16-bit PCM WAV of `seconds` length with a quiet sawtooth.
pub fn wav_bytes(seconds: u32, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).expect("wav writer should be created");
        for index in 0..seconds * sample_rate {
            let sample = ((index % 200) as i16 - 100) * 40;
            writer
                .write_sample(sample)
                .expect("wav sample should be written");
        }
        writer.finalize().expect("wav should finalize");
    }
    cursor.into_inner()
}

fn push_chunk(target: &mut Vec<u8>, id: &[u8; 4], payload: &[u8]) {
    target.extend_from_slice(id);
    target.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    target.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        target.push(0);
    }
}

fn patch_riff_size(wav: &mut [u8]) {
    let riff_size = (wav.len() - 8) as u32;
    wav[4..8].copy_from_slice(&riff_size.to_le_bytes());
}

fn data_chunk_offset(wav: &[u8]) -> usize {
    let mut offset = 12;
    while offset + 8 <= wav.len() {
        if &wav[offset..offset + 4] == b"data" {
            return offset;
        }
        let size = u32::from_le_bytes([
            wav[offset + 4],
            wav[offset + 5],
            wav[offset + 6],
            wav[offset + 7],
        ]) as usize;
        offset += 8 + size + size % 2;
    }
    panic!("fixture wav should contain a data chunk");
}

/// Inserts a `LIST/INFO` chunk (e.g. `INAM`, `IART`, `IPRD`) ahead of `data`.
pub fn with_info_tags(wav: Vec<u8>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut info = b"INFO".to_vec();
    for (key, value) in fields {
        let id: [u8; 4] = key
            .as_bytes()
            .try_into()
            .expect("info keys should be four bytes");
        let mut text = value.as_bytes().to_vec();
        text.push(0);
        push_chunk(&mut info, &id, &text);
    }

    let split = data_chunk_offset(&wav);
    let mut tagged = wav[..split].to_vec();
    push_chunk(&mut tagged, b"LIST", &info);
    tagged.extend_from_slice(&wav[split..]);
    patch_riff_size(&mut tagged);
    tagged
}

/// Appends a `LIST` chunk whose declared size runs far past the end of file.
pub fn with_corrupt_info_chunk(wav: Vec<u8>) -> Vec<u8> {
    let mut corrupt = wav;
    corrupt.extend_from_slice(b"LIST");
    corrupt.extend_from_slice(&0x7fff_fff0_u32.to_le_bytes());
    corrupt.extend_from_slice(b"INFOINAM\xff\xff\xff\x7f\x01\x02");
    patch_riff_size(&mut corrupt);
    corrupt
}
