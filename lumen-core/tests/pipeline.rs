//! Integration tests: decode units flowing from the transport through
//! the gate, the decoder and the display queue onto the surface.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{IDR, P_SLICE, PPS, Pipeline, SPS, annex_b};
use lumen_core::session::SubmitStatus;
use lumen_core::video::rewrite_sps;
use lumen_core::{ControlEvent, HostMessage};

async fn streaming_pipeline() -> Pipeline {
    let mut pipeline = Pipeline::spawn();
    let id = pipeline.start();
    pipeline.until_resolved(id).await;
    pipeline
        .until(|m| *m == HostMessage::status("Connection Established"))
        .await;
    pipeline
}

async fn wait_for_frames(pipeline: &Pipeline, at_least: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.frames.load(Ordering::SeqCst) < at_least {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("frames never presented");
}

#[tokio::test]
async fn parameter_sets_are_injected_ahead_of_the_idr() {
    let mut pipeline = streaming_pipeline().await;
    let transport = pipeline.transport.clone();

    assert_eq!(transport.deliver(0, &[annex_b(SPS)]), SubmitStatus::Ok);
    assert_eq!(transport.deliver(1, &[annex_b(PPS)]), SubmitStatus::Ok);
    assert!(pipeline.decoder.decoded().is_empty());

    let idr_head = annex_b(IDR);
    let idr_tail = bytes::Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(
        transport.deliver(2, &[idr_head.clone(), idr_tail.clone()]),
        SubmitStatus::Ok
    );

    let mut expected = vec![0, 0, 0, 1];
    expected.extend(rewrite_sps(SPS).unwrap_or_else(|_| SPS.to_vec()));
    expected.extend_from_slice(&annex_b(PPS));
    expected.extend_from_slice(&idr_head);
    expected.extend_from_slice(&idr_tail);

    let decoded = pipeline.decoder.decoded();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].0, 0);
    assert_eq!(decoded[0].1, expected);

    wait_for_frames(&pipeline, 1).await;
    pipeline.events.send(ControlEvent::Shutdown).unwrap();
    tokio_test::assert_ok!(pipeline.control.await.unwrap());
}

#[tokio::test]
async fn frames_flow_to_the_surface_in_order() {
    let mut pipeline = streaming_pipeline().await;
    let transport = pipeline.transport.clone();

    transport.deliver(0, &[annex_b(SPS)]);
    transport.deliver(1, &[annex_b(PPS)]);
    transport.deliver(2, &[annex_b(IDR)]);
    for frame in 3..20 {
        assert_eq!(transport.deliver(frame, &[annex_b(P_SLICE)]), SubmitStatus::Ok);
    }

    let ids: Vec<u32> = pipeline.decoder.decoded().iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, (0..18).collect::<Vec<_>>());

    wait_for_frames(&pipeline, 1).await;
    pipeline.barrier().await;

    let id = pipeline.request("stopRequest", &[]);
    pipeline.until_resolved(id).await;

    // Every picture handed to the display comes back once cleanup runs.
    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.decoder.outstanding() != 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("pictures never recycled");
}

#[tokio::test]
async fn regained_focus_requests_exactly_one_idr() {
    let mut pipeline = streaming_pipeline().await;
    let p = [annex_b(P_SLICE)];

    pipeline.wait_streaming(&p).await;
    assert_eq!(pipeline.transport.deliver(1, &p), SubmitStatus::Ok);
    assert_eq!(pipeline.transport.deliver(2, &p), SubmitStatus::Ok);

    pipeline.events.send(ControlEvent::FocusChanged(false)).unwrap();
    pipeline.barrier().await;
    assert_eq!(pipeline.transport.deliver(3, &p), SubmitStatus::Ok);

    pipeline.events.send(ControlEvent::FocusChanged(true)).unwrap();
    pipeline.barrier().await;
    assert_eq!(pipeline.transport.deliver(4, &p), SubmitStatus::NeedIdr);
    assert_eq!(pipeline.transport.deliver(5, &p), SubmitStatus::Ok);
}
