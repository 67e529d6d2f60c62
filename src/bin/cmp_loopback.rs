//! CMP 루프백 데모
//!
//! 캡처 모듈과 데이터 싱크를 루프백 전송으로 연결하고
//! 합성 CAN/아날로그 트래픽과 주기 상태 패킷을 흘려본다.
//!
//! 사용법:
//!   cargo run --release --bin cmp-loopback -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin cmp-loopback -- --frames 1000 --jumbo -v

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cmp_link::transport::loopback;
use cmp_link::{
    CanSample, CaptureModule, Config, DataBatch, DataDescriptor, DataSink, DeviceInfo,
    DomainDescriptor, EndpointKey, OutputBatch, PayloadType, ReceiveLoop, SampleType,
    TickResolution,
};

/// 데모 설정
struct DemoConfig {
    device_id: u16,
    can_frames: usize,
    analog_batches: usize,
    batch_size: usize,
    verbose: bool,
    config: Config,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            device_id: 1,
            can_frames: 200,
            analog_batches: 20,
            batch_size: 1000,
            verbose: false,
            config: Config::default(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(args: &[String], i: usize, name: &str) -> Result<T, String> {
    args.get(i + 1)
        .ok_or_else(|| format!("{} 값 필요", name))?
        .parse()
        .map_err(|_| format!("{}: 유효한 숫자 필요", name))
}

fn parse_args() -> Result<DemoConfig, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DemoConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--device" | "-d" => {
                config.device_id = parse_number(&args, i, "--device")?;
                i += 1;
            }
            "--frames" | "-n" => {
                config.can_frames = parse_number(&args, i, "--frames")?;
                i += 1;
            }
            "--batches" => {
                config.analog_batches = parse_number(&args, i, "--batches")?;
                i += 1;
            }
            "--batch-size" => {
                config.batch_size = parse_number(&args, i, "--batch-size")?;
                i += 1;
            }
            "--status-interval" => {
                config.config.status_interval_ms = parse_number(&args, i, "--status-interval")?;
                i += 1;
            }
            "--jumbo" => {
                config.config = Config {
                    status_interval_ms: config.config.status_interval_ms,
                    ..Config::jumbo()
                };
            }
            "--verbose" | "-v" => config.verbose = true,
            "--help" | "-h" => {
                println!(
                    r#"CMP Loopback - ASAM CMP 캡처/싱크 루프백 데모

사용법:
  cargo run --release --bin cmp-loopback -- [OPTIONS]

옵션:
  -d, --device <ID>           장치 ID (기본: 1)
  -n, --frames <N>            보낼 CAN 프레임 수 (기본: 200)
  --batches <N>               아날로그 묶음 수 (기본: 20)
  --batch-size <N>            아날로그 묶음당 샘플 수 (기본: 1000)
  --status-interval <MS>      상태 전송 주기 (기본: 1000)
  --jumbo                     점보 프레임 (최대 9000 바이트)
  -v, --verbose               디버그 로그 (RUST_LOG 미설정 시)
  -h, --help                  이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other)),
        }
        i += 1;
    }

    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let demo = parse_args()?;

    // 로깅 설정 (RUST_LOG가 있으면 우선)
    let default_filter = if demo.verbose { "cmp_link=debug,cmp_loopback=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = demo.config.clone();
    info!("CMP loopback starting...");
    info!(
        "Frame size: {}..{} bytes",
        config.min_frame_size,
        config.frame_constraints().max_frame_size
    );

    // 전송 경로
    let (transport, rx) = loopback(config.source_mac, config.output_queue_capacity.max(4096));

    // 수신 측
    let sink = Arc::new(DataSink::new(config.clone())?);
    let receive_sink = sink.clone();
    let received_frames = Arc::new(AtomicU64::new(0));
    let counter = received_frames.clone();
    let receive_loop = ReceiveLoop::spawn(rx, move |frame| {
        counter.fetch_add(1, Ordering::Relaxed);
        receive_sink.process_ethernet_frame(frame);
    })?;

    // 송신 측
    let mut device = DeviceInfo::new(demo.device_id, "cmp-loopback");
    device.serial_number = "LB-0001".into();
    device.software_version = env!("CARGO_PKG_VERSION").into();
    let capture = CaptureModule::new(config.clone(), device, transport.clone())?;

    let can_if = capture.add_interface(PayloadType::Can)?;
    let can_stream = can_if.add_stream(PayloadType::Can)?;
    can_stream.on_descriptor_changed(
        Some(DataDescriptor::can_message()),
        Some(DomainDescriptor::new(TickResolution::microseconds())),
    );

    let analog_if = capture.add_interface(PayloadType::Analog)?;
    let analog_stream = analog_if.add_stream(PayloadType::Analog)?;
    analog_stream.on_descriptor_changed(
        Some(
            DataDescriptor::scalar("voltage", SampleType::Float64)
                .with_range(-10.0, 10.0)
                .with_unit("V"),
        ),
        Some(DomainDescriptor::linear(TickResolution::microseconds(), 100)),
    );

    let can_out = sink.open_stream(
        EndpointKey::new(demo.device_id, can_if.id(), can_stream.id()),
        PayloadType::Can,
    );
    let analog_out = sink.open_stream(
        EndpointKey::new(demo.device_id, analog_if.id(), analog_stream.id()),
        PayloadType::Analog,
    );

    capture.start_status_loop()?;
    capture.send_status()?;

    let start = Instant::now();
    let mut rng = rand::thread_rng();

    let can_batch: Vec<CanSample> = (0..demo.can_frames)
        .map(|i| {
            let data: Vec<u8> = (0..rng.gen_range(0..=8)).map(|_| rng.gen()).collect();
            CanSample::new(i as u64 * 100, rng.gen_range(0..0x800), &data)
        })
        .collect();
    let mut frames_sent = 0;
    for chunk in can_batch.chunks(32) {
        frames_sent += can_stream.send(&DataBatch::Can(chunk.to_vec()))?;
    }

    for batch in 0..demo.analog_batches {
        let start_tick = (batch * demo.batch_size) as u64 * 100;
        let samples: Vec<f64> = (0..demo.batch_size)
            .map(|i| {
                let t = (batch * demo.batch_size + i) as f64 * 1e-4;
                9.5 * (2.0 * std::f64::consts::PI * 50.0 * t).sin()
            })
            .collect();
        frames_sent += analog_stream.send(&DataBatch::Analog { start_tick, samples })?;
    }

    // 수신 완료 대기
    let deadline = Instant::now() + Duration::from_secs(5);
    while received_frames.load(Ordering::Relaxed) < frames_sent as u64 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    capture.send_status()?;
    std::thread::sleep(Duration::from_millis(50));

    capture.stop_status_loop();
    receive_loop.stop();

    let can_received: usize = can_out
        .drain()
        .iter()
        .map(|batch| match batch {
            OutputBatch::Can(frames) => frames.len(),
            OutputBatch::Analog(_) => 0,
        })
        .sum();
    let analog_received: usize = analog_out
        .drain()
        .iter()
        .map(|batch| match batch {
            OutputBatch::Analog(out) => out.values.len(),
            OutputBatch::Can(_) => 0,
        })
        .sum();

    info!("Elapsed: {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);
    info!(
        "Frames: sent {}, received {}, dropped {}",
        transport.frames_sent(),
        received_frames.load(Ordering::Relaxed),
        transport.frames_dropped()
    );
    info!("CAN frames: {} / {}", can_received, demo.can_frames);
    info!(
        "Analog samples: {} / {}",
        analog_received,
        demo.analog_batches * demo.batch_size
    );
    info!("Invalid packets: {}", sink.invalid_packets());
    for line in sink.status().summary() {
        println!("{}", line);
    }

    Ok(())
}
