//! nerfnet primary - 터널 왕복을 주도하는 쪽
//!
//! 라디오 링크(UDP 에뮬레이션) 위로 요청을 보내고, 로컬 디바이스(UDP)와 IP 프레임을 주고받음
//!
//! 사용법:
//!   cargo run --release --bin nerfnet-primary -- [OPTIONS]
//!
//! 예시:
//!   # 기본 설정, 시작 시 ping 확인
//!   cargo run --release --bin nerfnet-primary -- --link-bind 127.0.0.1:7001 --link-peer 127.0.0.1:7002 --ping 3

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use nerfnet::config::Role;
use nerfnet::device::UdpDevice;
use nerfnet::{Config, Primary, UdpLink, DEFAULT_MAX_PAYLOAD_SIZE};

/// primary 실행 설정
struct PrimaryOptions {
    link_bind: SocketAddr,
    link_peer: SocketAddr,
    device_bind: SocketAddr,
    device_peer: SocketAddr,
    pings: u32,
    stats_interval: Duration,
    config: Config,
}

impl Default for PrimaryOptions {
    fn default() -> Self {
        Self {
            link_bind: "127.0.0.1:7001".parse().unwrap(),
            link_peer: "127.0.0.1:7002".parse().unwrap(),
            device_bind: "127.0.0.1:8001".parse().unwrap(),
            device_peer: "127.0.0.1:8101".parse().unwrap(),
            pings: 0,
            stats_interval: Duration::from_secs(10),
            config: Config::default(),
        }
    }
}

fn parse_u32(value: &str) -> u32 {
    match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).expect("유효한 16진수 필요"),
        None => value.parse().expect("유효한 숫자 필요"),
    }
}

fn parse_args() -> PrimaryOptions {
    let args: Vec<String> = std::env::args().collect();
    let mut options = PrimaryOptions::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--preset", Some(v)) => {
                options.config = match v.as_str() {
                    "low-latency" => Config::low_latency(),
                    "lossy" => Config::lossy_link(),
                    _ => Config::default(),
                };
                i += 1;
            }
            ("--link-bind", Some(v)) => {
                options.link_bind = v.parse().expect("유효한 주소 필요");
                i += 1;
            }
            ("--link-peer", Some(v)) => {
                options.link_peer = v.parse().expect("유효한 주소 필요");
                i += 1;
            }
            ("--device-bind", Some(v)) => {
                options.device_bind = v.parse().expect("유효한 주소 필요");
                i += 1;
            }
            ("--device-peer", Some(v)) => {
                options.device_peer = v.parse().expect("유효한 주소 필요");
                i += 1;
            }
            ("--primary-address", Some(v)) => {
                options.config.primary_address = parse_u32(v);
                i += 1;
            }
            ("--secondary-address", Some(v)) => {
                options.config.secondary_address = parse_u32(v);
                i += 1;
            }
            ("--chunk-size", Some(v)) => {
                options.config.chunk_size = v.parse().expect("유효한 숫자 필요");
                i += 1;
            }
            ("--rf-delay-us", Some(v)) => {
                options.config.rf_delay = Duration::from_micros(v.parse().expect("유효한 숫자 필요"));
                i += 1;
            }
            ("--timeout-ms", Some(v)) => {
                options.config.receive_timeout =
                    Duration::from_millis(v.parse().expect("유효한 숫자 필요"));
                i += 1;
            }
            ("--beacon-ms", Some(v)) => {
                options.config.beacon_interval =
                    Some(Duration::from_millis(v.parse().expect("유효한 숫자 필요")));
                i += 1;
            }
            ("--ping", Some(v)) => {
                options.pings = v.parse().expect("유효한 숫자 필요");
                i += 1;
            }
            ("--stats-secs", Some(v)) => {
                options.stats_interval = Duration::from_secs(v.parse().expect("유효한 숫자 필요"));
                i += 1;
            }
            ("--help" | "-h", _) => {
                println!(
                    r#"nerfnet primary - 요청/응답 라디오 터널 (주도하는 쪽)

사용법:
  cargo run --release --bin nerfnet-primary -- [OPTIONS]

옵션:
  --preset <NAME>              default | low-latency | lossy
  --link-bind <ADDR>           링크 소켓 바인드 주소 (기본: 127.0.0.1:7001)
  --link-peer <ADDR>           secondary 링크 소켓 주소 (기본: 127.0.0.1:7002)
  --device-bind <ADDR>         디바이스 소켓 바인드 주소 (기본: 127.0.0.1:8001)
  --device-peer <ADDR>         완성 프레임을 보낼 주소 (기본: 127.0.0.1:8101)
  --primary-address <ADDR>     primary -> secondary 채널 주소 (10진수 또는 0x..)
  --secondary-address <ADDR>   secondary -> primary 채널 주소
  --chunk-size <SIZE>          청크 크기 바이트 (기본: 8)
  --rf-delay-us <US>           왕복 사이 지연 (기본: 5000)
  --timeout-ms <MS>            응답 데드라인 (기본: 50)
  --beacon-ms <MS>             비콘 주기 (기본: 끔)
  --ping <N>                   시작 전 ping 왕복 N 번
  --stats-secs <SECS>          통계 출력 주기 (기본: 10)
  -h, --help                   이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            (other, _) => warn!("알 수 없는 옵션 무시: {}", other),
        }
        i += 1;
    }

    options
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG 로 조정 가능)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args();
    let config = options.config.clone();
    let (reading_address, writing_address) = config.link_addresses(Role::Primary);

    info!("nerfnet primary starting...");
    info!("Link: {} -> {}", options.link_bind, options.link_peer);
    info!("Device: {} -> {}", options.device_bind, options.device_peer);
    info!("Chunk size: {} bytes", config.chunk_size);
    info!("Receive timeout: {:?}", config.receive_timeout);

    let link = UdpLink::bind(
        options.link_bind,
        options.link_peer,
        reading_address,
        writing_address,
        DEFAULT_MAX_PAYLOAD_SIZE,
    )
    .await?;
    let device = UdpDevice::bind(options.device_bind, options.device_peer).await?;

    let mut primary = Primary::new(config.clone(), Box::new(link), Box::new(device.clone()))?;

    for value in 0..options.pings {
        match primary.ping(Some(value)).await {
            Ok(echo) => info!("Ping {} -> {:?}", value, echo),
            Err(e) => warn!("Ping {} failed: {}", value, e),
        }
    }

    let _reader = device.spawn_reader(primary.tunnel(), config.max_frame_size);

    let stats = primary.stats_handle();
    let stats_interval = options.stats_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(stats_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            info!("{}", stats.read().summary());
        }
    });

    info!("Tunnel running");
    primary.run().await;

    Ok(())
}
