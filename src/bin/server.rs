//! CFDP 노드 - UDP 위에서 동작하는 CFDP 엔티티
//!
//! - 수신 데이터그램은 엔진의 `submit_pdu`로
//! - 표준 입력의 한 줄은 사용자 요청 (`PUT`, `CANCEL 23_4`, `REPORT all` ...)
//! - 일정 주기로 `cycle()` 실행 후 출력 PDU를 디렉티브 우선으로 송신
//!
//! 사용법:
//!   cargo run --release --bin cfdp-node -- [OPTIONS]
//!
//! 예시:
//!   # 엔티티 23, 피어 88은 127.0.0.1:4088
//!   cargo run --release --bin cfdp-node -- --id 23 --bind 0.0.0.0:4023 --peer 88=127.0.0.1:4088

use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cfdp::link::parse_peer;
use cfdp::{
    Callbacks, Config, Engine, Id, LogIndication, QueueOutput, StdFilestore, SystemClock, UdpLink,
    MAX_PDU_LENGTH,
};

/// 노드 설정
struct NodeConfig {
    bind_addr: SocketAddr,
    peers: Vec<(Id, SocketAddr)>,
    root: PathBuf,
    cycle: Duration,
    report_every: Duration,
    config: Config,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            peers: Vec::new(),
            root: PathBuf::from("."),
            cycle: Duration::from_millis(10),
            report_every: Duration::from_secs(30),
            config: Config::default(),
        }
    }
}

const USAGE: &str = r#"CFDP Node - CCSDS File Delivery Protocol 엔티티

사용법:
  cargo run --release --bin cfdp-node -- [OPTIONS]

옵션:
  -i, --id <ID>            로컬 엔티티 ID (기본: 88)
  -b, --bind <ADDR>        바인드 주소 (기본: 0.0.0.0:4000)
  -p, --peer <ID>=<ADDR>   피어 주소 (반복 가능)
  -r, --root <DIR>         파일 저장소 루트 (기본: 현재 디렉터리)
  --cycle-ms <MS>          엔진 사이클 주기 (기본: 10)
  --report-secs <S>        요약 로그 주기 (기본: 30)
  --profile <NAME>         class1 | long-delay | unstable
  --mib <NAME>=<VALUE>     MIB 파라미터 (반복 가능)
  -h, --help               이 도움말 출력

표준 입력 요청:
  PUT [-class1|-class2] <source-file> <dest-id> [<dest-file>]
  SUSPEND|RESUME|CANCEL|ABANDON|REPORT <source-id>_<seq>|all
  FREEZE | THAW
"#;

fn parse_args() -> Result<NodeConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut node = NodeConfig::default();
    let mut my_id: Option<Id> = None;
    let mut mib: Vec<String> = Vec::new();

    let value = |i: usize| -> Result<&str, String> {
        args.get(i + 1)
            .map(String::as_str)
            .ok_or_else(|| format!("{} 다음에 값이 필요함", args[i]))
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--id" | "-i" => {
                my_id = Some(value(i)?.parse()?);
                i += 1;
            }
            "--bind" | "-b" => {
                node.bind_addr = value(i)?.parse()?;
                i += 1;
            }
            "--peer" | "-p" => {
                node.peers.push(parse_peer(value(i)?)?);
                i += 1;
            }
            "--root" | "-r" => {
                node.root = PathBuf::from(value(i)?);
                i += 1;
            }
            "--cycle-ms" => {
                node.cycle = Duration::from_millis(value(i)?.parse()?);
                i += 1;
            }
            "--report-secs" => {
                node.report_every = Duration::from_secs(value(i)?.parse()?);
                i += 1;
            }
            "--profile" => {
                node.config = match value(i)? {
                    "class1" => Config::class1_link(),
                    "long-delay" => Config::long_delay_link(),
                    "unstable" => Config::unstable_link(),
                    other => return Err(format!("알 수 없는 프로파일: {}", other).into()),
                };
                i += 1;
            }
            "--mib" => {
                mib.push(value(i)?.to_string());
                i += 1;
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => eprintln!("알 수 없는 옵션 무시: {}", other),
        }
        i += 1;
    }

    // 프로파일을 먼저 고른 뒤 ID와 MIB 덮어쓰기
    if let Some(id) = my_id {
        node.config.my_id = id;
    }
    for entry in mib {
        let (name, val) = entry
            .split_once('=')
            .ok_or_else(|| format!("MIB는 <NAME>=<VALUE> 형식: {}", entry))?;
        node.config.set_parameter(name, val)?;
    }
    Ok(node)
}

/// 표준 입력을 별도 스레드에서 읽어 채널로 전달
fn spawn_stdin_reader() -> crossbeam_channel::Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let node = parse_args()?;

    info!("CFDP Node starting...");
    info!("Entity ID: {}", node.config.my_id);
    info!("Filestore root: {:?}", node.root);
    info!("Cycle: {:?}", node.cycle);

    let link = UdpLink::bind(node.bind_addr).await?;
    for (id, addr) in &node.peers {
        link.add_peer(*id, *addr);
    }

    let output = QueueOutput::new();
    let callbacks = Callbacks::new(
        StdFilestore::new(node.root.clone()),
        LogIndication,
        output.clone(),
        SystemClock,
    );
    let engine = Arc::new(Mutex::new(Engine::new(node.config.clone(), callbacks)));

    // 주기적 요약 로그
    let reporter = engine.clone();
    let report_every = node.report_every;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(report_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let summary = reporter.lock().summary_status();
            info!(
                "summary: {} senders, {} receivers, sent {} / received {} (failed {} / {})",
                summary.how_many_senders,
                summary.how_many_receivers,
                summary.total_files_sent,
                summary.total_files_received,
                summary.total_unsuccessful_senders,
                summary.total_unsuccessful_receivers
            );
        }
    });

    let requests = spawn_stdin_reader();
    let mut ticker = tokio::time::interval(node.cycle);
    let mut buf = vec![0u8; MAX_PDU_LENGTH];

    loop {
        tokio::select! {
            result = link.recv(&mut buf) => {
                match result {
                    Ok(len) => {
                        if let Err(e) = engine.lock().submit_pdu(&buf[..len]) {
                            warn!("PDU 처리 실패: {}", e);
                        }
                    }
                    Err(e) => warn!("수신 에러: {}", e),
                }
            }
            _ = ticker.tick() => {
                {
                    let mut engine = engine.lock();
                    for line in requests.try_iter() {
                        if let Err(e) = engine.submit_request(line.trim()) {
                            warn!("요청 거부 '{}': {}", line.trim(), e);
                        }
                    }
                    engine.cycle();
                }
                link.route(&output);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down ({} active transactions)", engine.lock().how_many_active_trans());
                break;
            }
        }
    }

    Ok(())
}
