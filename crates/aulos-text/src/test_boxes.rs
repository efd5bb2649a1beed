//! ISO BMFF fixture builders shared by the MP4 parser tests.

pub fn make_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&u32::try_from(8 + payload.len()).unwrap().to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(payload);
    out
}

pub fn make_full_box(fourcc: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![version];
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(payload);
    make_box(fourcc, &body)
}

/// `moov/trak/mdia/{mdhd,minf/stbl/stsd}` init segment with one sample
/// entry of the given format.
pub fn make_init_segment(timescale: u32, sample_entry: &[u8; 4]) -> Vec<u8> {
    let mut mdhd_payload = Vec::new();
    mdhd_payload.extend_from_slice(&0u32.to_be_bytes()); // creation
    mdhd_payload.extend_from_slice(&0u32.to_be_bytes()); // modification
    mdhd_payload.extend_from_slice(&timescale.to_be_bytes());
    mdhd_payload.extend_from_slice(&0u32.to_be_bytes()); // duration
    mdhd_payload.extend_from_slice(&[0; 4]); // language + pre_defined
    let mdhd = make_full_box(b"mdhd", 0, 0, &mdhd_payload);

    let entry = make_box(sample_entry, &[0; 8]);
    let mut stsd_payload = 1u32.to_be_bytes().to_vec();
    stsd_payload.extend_from_slice(&entry);
    let stsd = make_full_box(b"stsd", 0, 0, &stsd_payload);

    let stbl = make_box(b"stbl", &stsd);
    let minf = make_box(b"minf", &stbl);
    let mut mdia_payload = mdhd;
    mdia_payload.extend_from_slice(&minf);
    let mdia = make_box(b"mdia", &mdia_payload);
    let trak = make_box(b"trak", &mdia);
    make_box(b"moov", &trak)
}

/// `moof/traf/{tfhd,tfdt,trun}` + `mdat` fragment for samples described by
/// `(duration_ticks, payload)` pairs.
pub fn make_media_segment(base_time: u64, samples: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let tfhd = make_full_box(b"tfhd", 0, 0, &1u32.to_be_bytes());

    let mut tfdt_payload = Vec::new();
    tfdt_payload.extend_from_slice(&base_time.to_be_bytes());
    let tfdt = make_full_box(b"tfdt", 1, 0, &tfdt_payload);

    // duration-present | size-present
    let trun_flags = 0x100 | 0x200;
    let mut trun_payload = u32::try_from(samples.len()).unwrap().to_be_bytes().to_vec();
    for (duration, payload) in samples {
        trun_payload.extend_from_slice(&duration.to_be_bytes());
        trun_payload.extend_from_slice(&u32::try_from(payload.len()).unwrap().to_be_bytes());
    }
    let trun = make_full_box(b"trun", 0, trun_flags, &trun_payload);

    let mut traf_payload = tfhd;
    traf_payload.extend_from_slice(&tfdt);
    traf_payload.extend_from_slice(&trun);
    let traf = make_box(b"traf", &traf_payload);
    let moof = make_box(b"moof", &traf);

    let mut mdat_payload = Vec::new();
    for (_, payload) in samples {
        mdat_payload.extend_from_slice(payload);
    }
    let mdat = make_box(b"mdat", &mdat_payload);

    let mut out = moof;
    out.extend_from_slice(&mdat);
    out
}

/// A `vttc` sample payload with the given cue text and optional settings.
pub fn make_vttc(text: &str, settings: Option<&str>) -> Vec<u8> {
    let mut body = make_box(b"payl", text.as_bytes());
    if let Some(settings) = settings {
        body.extend_from_slice(&make_box(b"sttg", settings.as_bytes()));
    }
    make_box(b"vttc", &body)
}

pub fn make_vtte() -> Vec<u8> {
    make_box(b"vtte", &[])
}
