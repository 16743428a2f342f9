use bytes::BytesMut;
use replhost::kernel::codec::{KernelCodec, KernelFrame, MAX_LINE_BYTES};
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn decodes_complete_lines_only() {
    let mut codec = KernelCodec::new();
    let mut buf = BytesMut::from(&b"{\"event\":\"ready\"}\npartial"[..]);

    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some(KernelFrame::Line("{\"event\":\"ready\"}".to_owned()))
    );
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    assert_eq!(
        codec.decode_eof(&mut buf).expect("eof"),
        Some(KernelFrame::Line("partial".to_owned()))
    );
}

#[test]
fn encodes_with_newline() {
    let mut codec = KernelCodec::default();
    let mut dst = BytesMut::new();
    codec.encode("{\"op\":\"snapshot\",\"id\":1}".to_owned(), &mut dst).expect("encode");
    assert_eq!(&dst[..], b"{\"op\":\"snapshot\",\"id\":1}\n");
}

#[test]
fn overlong_line_is_dropped_and_decoding_continues() {
    let mut codec = KernelCodec::new();
    let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_BYTES + 1].as_slice());
    buf.extend_from_slice(b"aaaa\n{\"event\":\"restored\",\"id\":2}\n");

    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some(KernelFrame::Oversized {
            limit: MAX_LINE_BYTES
        })
    );
    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some(KernelFrame::Line("{\"event\":\"restored\",\"id\":2}".to_owned()))
    );
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
}

#[test]
fn custom_limit_applies() {
    let mut codec = KernelCodec::with_max_length(8);
    assert_eq!(codec.max_length(), 8);
    let mut buf = BytesMut::from(&b"0123456789\nshort\n"[..]);

    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some(KernelFrame::Oversized { limit: 8 })
    );
    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some(KernelFrame::Line("short".to_owned()))
    );
}
