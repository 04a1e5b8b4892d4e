use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gavf::codec::FLAG_HAS_P_FRAMES;
use gavf::io::{ReadVarExt, WriteVarExt};
use gavf::{
    AudioFormat, CodecId, CompressionInfo, Dictionary, GavfReader, GavfWriter, Options, Packet, PacketFlags,
    ProgramHeader, Seekable, VideoFormat,
};
use std::io::Cursor;

fn av_header() -> ProgramHeader {
    let mut h = ProgramHeader::new();
    let mut afmt = AudioFormat::new(48000, 2);
    afmt.samples_per_frame = 1024;
    h.add_audio_stream(CompressionInfo::new(CodecId::Aac), afmt, Dictionary::new());
    h.add_video_stream(
        CompressionInfo::new(CodecId::H264).with_flags(FLAG_HAS_P_FRAMES),
        VideoFormat::new(1920, 1080, 25, 1),
        Dictionary::new(),
    );
    h
}

fn mux_seconds(seconds: i64) -> Vec<u8> {
    let mut wr = GavfWriter::new(Seekable::memory(), av_header(), Options::default()).unwrap();
    let audio = vec![1u8; 400];
    let video = vec![2u8; 20_000];
    let mut audio_pts = 0i64;
    for frame in 0..seconds * 25 {
        let flags = if frame % 25 == 0 { PacketFlags::keyframe() } else { PacketFlags::p_frame() };
        wr.put_packet(2, Packet::new(frame, 1, flags, video.clone())).unwrap();
        // 1920 samples per video frame
        while audio_pts < (frame + 1) * 1920 {
            wr.put_packet(1, Packet::new(audio_pts, 1024, PacketFlags::keyframe(), audio.clone())).unwrap();
            audio_pts += 1024;
        }
    }
    wr.finish().unwrap().into_inner().into_inner()
}

fn bench_varint(c: &mut Criterion) {
    let values: Vec<i64> = (0..4096i64)
        .map(|i| {
            let v = (i * 7919) << (i % 32);
            if i & 1 == 1 { -v } else { v }
        })
        .collect();

    c.bench_function("int64v_encode_decode_4k", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(values.len() * 9);
            for v in &values {
                buf.write_int64v(black_box(*v)).unwrap();
            }
            let mut rd = Cursor::new(buf);
            for _ in 0..values.len() {
                black_box(rd.read_int64v().unwrap());
            }
        })
    });
}

fn bench_mux(c: &mut Criterion) {
    c.bench_function("mux_10s_av", |b| b.iter(|| black_box(mux_seconds(10))));
}

fn bench_demux(c: &mut Criterion) {
    let file = mux_seconds(10);

    c.bench_function("demux_10s_av", |b| {
        b.iter(|| {
            let mut rd = GavfReader::open(Seekable::from_bytes(file.clone()), Options::default()).unwrap();
            let mut n = 0;
            while let Some(p) = rd.read_packet().unwrap() {
                n += p.data.len();
            }
            black_box(n)
        })
    });

    c.bench_function("seek_10s_av", |b| {
        let mut rd = GavfReader::open(Seekable::from_bytes(file.clone()), Options::default()).unwrap();
        b.iter(|| {
            for t in [1, 4, 7, 9] {
                black_box(rd.seek(black_box(t), 1).unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_varint, bench_mux, bench_demux);
criterion_main!(benches);
