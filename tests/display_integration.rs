/*
 *  tests/display_integration.rs
 *
 *  Integration tests for the flush pipeline
 *
 *  sh1106-fbsync - keep the glass in step with the framebuffer
 *  (c) 2020-26 Stuart Hunter
 */

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::time::Duration;

use sh1106_fbsync::display::drivers::mock::RecordingTransport;
use sh1106_fbsync::display::{
    Admission, ContrastError, ContrastStoreError, DriverOptions, Geometry, MappedSurface,
    MemorySurface, Polarity, Sh1106Fb, SurfaceGeometry,
};
use tempfile::NamedTempFile;

const INIT_WRITES: usize = 21;
const FRAME_WRITES: usize = 88;

/// Data payloads of one frame, page by page, control bytes stripped
fn frame_bytes(writes: &[Vec<u8>]) -> Vec<u8> {
    writes
        .iter()
        .filter(|w| w[0] == 0x40)
        .flat_map(|w| w[1..].iter().copied())
        .collect()
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_init_sequence_on_attach() {
    let recorder = RecordingTransport::new();
    let fb = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), DriverOptions::default()).unwrap();

    let bytes: Vec<u8> = recorder.writes().iter().map(|w| {
        assert_eq!(w.len(), 2);
        assert_eq!(w[0], 0x00);
        w[1]
    }).collect();
    assert_eq!(
        bytes,
        vec![
            0xAE, 0xD5, 0x80, 0xA8, 0x3F, 0xD3, 0x00, 0x40, 0xA1, 0xC8,
            0xDA, 0x12, 0x81, 0x7F, 0xA4, 0xA6, 0x8D, 0x14, 0x20, 0x02, 0xAF,
        ]
    );

    fb.detach().await.unwrap();
}

#[tokio::test]
async fn test_blank_surface_sends_zero_chunks() {
    let recorder = RecordingTransport::new();
    let fb = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), DriverOptions::default()).unwrap();
    recorder.reset();

    assert_eq!(fb.flush_now().await.unwrap(), FRAME_WRITES);
    let writes = recorder.writes();
    assert_eq!(writes.len(), FRAME_WRITES);

    for page in 0..8u8 {
        let base = page as usize * 11;
        assert_eq!(writes[base], vec![0x00, 0xB0 + page]);
        assert_eq!(writes[base + 1], vec![0x00, 0x00]);
        assert_eq!(writes[base + 2], vec![0x00, 0x10]);
        for chunk in &writes[base + 3..base + 11] {
            assert_eq!(chunk.len(), 17);
            assert_eq!(chunk[0], 0x40);
            assert!(chunk[1..].iter().all(|&b| b == 0));
        }
    }

    fb.detach().await.unwrap();
}

#[tokio::test]
async fn test_single_pixel_row_one() {
    let recorder = RecordingTransport::new();
    let surface = MemorySurface::new(128, 64);
    surface.set(0, 1, true);
    let fb = Sh1106Fb::attach(recorder.clone(), surface, DriverOptions::default()).unwrap();
    recorder.reset();

    fb.flush_now().await.unwrap();
    let frame = frame_bytes(&recorder.writes());
    assert_eq!(frame.len(), 1024);
    assert_eq!(frame[0], 0x02);
    assert!(frame[1..].iter().all(|&b| b == 0));

    fb.detach().await.unwrap();
}

#[tokio::test]
async fn test_inverted_polarity_and_offset() {
    let recorder = RecordingTransport::new();
    let options = DriverOptions {
        geometry: Geometry::default().with_column_offset(2),
        polarity: Polarity::Inverted,
        ..DriverOptions::default()
    };
    let fb = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), options).unwrap();
    recorder.reset();

    fb.flush_now().await.unwrap();
    let writes = recorder.writes();
    assert_eq!(writes[1], vec![0x00, 0x02]);
    assert_eq!(writes[2], vec![0x00, 0x10]);
    assert!(frame_bytes(&writes).iter().all(|&b| b == 0xFF));

    fb.detach().await.unwrap();
}

#[tokio::test]
async fn test_mapped_surface_changes_reach_the_panel() {
    let geometry = SurfaceGeometry::packed(128, 64);
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&vec![0u8; geometry.len()]).unwrap();
    file.flush().unwrap();

    let surface = MappedSurface::open(file.path(), geometry).unwrap();
    let recorder = RecordingTransport::new();
    let fb = Sh1106Fb::attach(recorder.clone(), surface, DriverOptions::default()).unwrap();
    recorder.reset();

    fb.flush_now().await.unwrap();
    assert!(frame_bytes(&recorder.writes()).iter().all(|&b| b == 0));

    // light the whole of row 9 (page 1, bit 1) from outside the process view
    let writer = OpenOptions::new().write(true).open(file.path()).unwrap();
    writer.write_at(&[0xFF; 16], 9 * 16).unwrap();
    recorder.reset();

    fb.flush_now().await.unwrap();
    let frame = frame_bytes(&recorder.writes());
    assert!(frame[..128].iter().all(|&b| b == 0));
    assert!(frame[128..256].iter().all(|&b| b == 0x02));
    assert!(frame[256..].iter().all(|&b| b == 0));

    fb.detach().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_of_requests_yields_one_flush() {
    let recorder = RecordingTransport::new();
    let fb = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), DriverOptions::default()).unwrap();
    recorder.reset();
    recorder.pause();

    let admissions: Vec<Admission> = (0..10).map(|_| fb.request_flush()).collect();
    assert_eq!(admissions[0], Admission::Scheduled);
    assert!(admissions[1..].iter().all(|a| *a == Admission::Busy));

    recorder.resume();
    wait_until(|| fb.stats().completed == 1).await;
    assert_eq!(recorder.completed(), FRAME_WRITES);
    assert_eq!(fb.stats().dropped, 9);

    fb.detach().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_flush_self_heals() {
    let recorder = RecordingTransport::new();
    let options = DriverOptions { flush_interval: Duration::from_millis(10), ..DriverOptions::default() };
    let mut fb = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), options).unwrap();

    recorder.fail_all(true);
    fb.arm();
    wait_until(|| fb.stats().failed >= 2).await;

    recorder.fail_all(false);
    wait_until(|| fb.stats().completed >= 1).await;

    let counts = fb.detach().await.unwrap();
    assert!(counts.failed >= 2);
    assert!(counts.completed >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_armed_pipeline_follows_surface() {
    let recorder = RecordingTransport::new();
    let surface = MemorySurface::new(128, 64);
    let drawing = surface.clone();
    let options = DriverOptions { flush_interval: Duration::from_millis(10), ..DriverOptions::default() };
    let mut fb = Sh1106Fb::attach(recorder.clone(), surface, options).unwrap();
    fb.arm();

    drawing.set(127, 63, true);
    let seen = fb.stats().completed;
    wait_until(|| fb.stats().completed >= seen + 2).await;
    fb.detach().await.unwrap();

    // last frame sits right before the display-off
    let writes = recorder.writes();
    assert_eq!(writes.last(), Some(&vec![0x00, 0xAE]));
    let frame = frame_bytes(&writes[writes.len() - 1 - FRAME_WRITES..writes.len() - 1]);
    assert_eq!(frame[7 * 128 + 127], 0x80);
    assert_eq!((writes.len() - INIT_WRITES - 1) % FRAME_WRITES, 0);
}

#[tokio::test]
async fn test_contrast_out_of_range_keeps_default() {
    let recorder = RecordingTransport::new();
    let fb = Sh1106Fb::attach(recorder.clone(), MemorySurface::new(128, 64), DriverOptions::default()).unwrap();
    let contrast = fb.contrast();
    recorder.reset();

    let err = contrast.store("300").unwrap_err();
    assert!(matches!(err, ContrastStoreError::Invalid(ContrastError::OutOfRange(300))));
    assert_eq!(contrast.show(), "127\n");
    assert!(recorder.writes().is_empty());

    assert_eq!(contrast.store("8\n").unwrap(), 8);
    assert_eq!(recorder.writes(), vec![vec![0x00, 0x81], vec![0x00, 0x08]]);

    fb.detach().await.unwrap();
}
