//! CFDP Put 클라이언트 - 파일 하나를 보내고 종료
//!
//! PUT 요청 하나를 제출하고 트랜잭션이 끝날 때까지 엔진을 돌린다.
//! 최종 상태를 출력하고, 성공하지 못했으면 0이 아닌 코드로 종료한다.
//!
//! 사용법:
//!   cargo run --release --bin cfdp-put -- [OPTIONS] <source-file> <dest-id> [<dest-file>]
//!
//! 예시:
//!   cargo run --release --bin cfdp-put -- --peer 23=127.0.0.1:4023 report.bin 23
//!   cargo run --release --bin cfdp-put -- --class1 -p 23=10.0.0.5:4000 a.txt 23 b.txt

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cfdp::link::parse_peer;
use cfdp::{
    Callbacks, ChannelIndication, Config, Engine, FinalStatus, Id, IndicationType, QueueOutput,
    StdFilestore, SystemClock, TransStatus, UdpLink, MAX_PDU_LENGTH,
};

/// 클라이언트 설정
struct PutConfig {
    bind_addr: SocketAddr,
    peers: Vec<(Id, SocketAddr)>,
    root: PathBuf,
    class1: bool,
    cycle: Duration,
    source: String,
    dest_id: String,
    dest: Option<String>,
    config: Config,
}

impl Default for PutConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            peers: Vec::new(),
            root: PathBuf::from("."),
            class1: false,
            cycle: Duration::from_millis(5),
            source: String::new(),
            dest_id: String::new(),
            dest: None,
            config: Config::default(),
        }
    }
}

const USAGE: &str = r#"CFDP Put - 파일 하나를 CFDP로 전송

사용법:
  cargo run --release --bin cfdp-put -- [OPTIONS] <source-file> <dest-id> [<dest-file>]

옵션:
  -i, --id <ID>            로컬 엔티티 ID (기본: 88)
  -b, --bind <ADDR>        바인드 주소 (기본: 0.0.0.0:0 = 자동 할당)
  -p, --peer <ID>=<ADDR>   피어 주소 (반복 가능, 목적지는 필수)
  -r, --root <DIR>         파일 저장소 루트 (기본: 현재 디렉터리)
  --class1                 Class 1 (무확인) 전송
  --cycle-ms <MS>          엔진 사이클 주기 (기본: 5)
  --mib <NAME>=<VALUE>     MIB 파라미터 (반복 가능)
  -h, --help               이 도움말 출력
"#;

fn parse_args() -> Result<PutConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut put = PutConfig::default();
    let mut positional: Vec<String> = Vec::new();

    let value = |i: usize| -> Result<&str, String> {
        args.get(i + 1)
            .map(String::as_str)
            .ok_or_else(|| format!("{} 다음에 값이 필요함", args[i]))
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--id" | "-i" => {
                put.config.my_id = value(i)?.parse()?;
                i += 1;
            }
            "--bind" | "-b" => {
                put.bind_addr = value(i)?.parse()?;
                i += 1;
            }
            "--peer" | "-p" => {
                put.peers.push(parse_peer(value(i)?)?);
                i += 1;
            }
            "--root" | "-r" => {
                put.root = PathBuf::from(value(i)?);
                i += 1;
            }
            "--class1" => put.class1 = true,
            "--cycle-ms" => {
                put.cycle = Duration::from_millis(value(i)?.parse()?);
                i += 1;
            }
            "--mib" => {
                let entry = value(i)?;
                let (name, val) = entry
                    .split_once('=')
                    .ok_or_else(|| format!("MIB는 <NAME>=<VALUE> 형식: {}", entry))?;
                put.config.set_parameter(name, val)?;
                i += 1;
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    match (positional.next(), positional.next()) {
        (Some(source), Some(dest_id)) => {
            put.source = source;
            put.dest_id = dest_id;
            put.dest = positional.next();
        }
        _ => return Err(format!("<source-file> <dest-id>가 필요함\n\n{}", USAGE).into()),
    }
    Ok(put)
}

impl PutConfig {
    /// 엔진에 줄 PUT 요청 문자열
    fn request(&self) -> String {
        let class = if self.class1 { "-class1" } else { "-class2" };
        match &self.dest {
            Some(dest) => format!("PUT {} {} {} {}", class, self.source, self.dest_id, dest),
            None => format!("PUT {} {} {}", class, self.source, self.dest_id),
        }
    }
}

/// 쌓인 알림에서 최종 상태만 골라냄
fn collect_final(
    indications: &crossbeam_channel::Receiver<(IndicationType, TransStatus)>,
    final_status: &mut Option<TransStatus>,
) {
    for (kind, status) in indications.try_iter() {
        match kind {
            IndicationType::TransactionFinished | IndicationType::Abandoned => {
                *final_status = Some(status);
            }
            IndicationType::Fault => warn!("fault: {} ({})", status.condition_code, status.trans),
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let put = parse_args()?;

    let link = UdpLink::bind(put.bind_addr).await?;
    for (id, addr) in &put.peers {
        link.add_peer(*id, *addr);
    }

    let output = QueueOutput::new();
    let (indication, indications) = ChannelIndication::unbounded();
    let callbacks = Callbacks::new(
        StdFilestore::new(put.root.clone()),
        indication,
        output.clone(),
        SystemClock,
    );
    let mut engine = Engine::new(put.config.clone(), callbacks);

    let request = put.request();
    info!("CFDP Put starting: {}", request);
    engine.submit_request(&request)?;

    let start = Instant::now();
    let mut ticker = tokio::time::interval(put.cycle);
    let mut buf = vec![0u8; MAX_PDU_LENGTH];
    let mut final_status = None;

    while engine.how_many_active_trans() > 0 {
        tokio::select! {
            result = link.recv(&mut buf) => {
                match result {
                    Ok(len) => {
                        if let Err(e) = engine.submit_pdu(&buf[..len]) {
                            warn!("PDU 처리 실패: {}", e);
                        }
                    }
                    Err(e) => warn!("수신 에러: {}", e),
                }
            }
            _ = ticker.tick() => {
                engine.cycle();
                link.route(&output);
            }
        }

        collect_final(&indications, &mut final_status);
    }
    collect_final(&indications, &mut final_status);

    // 마지막 PDU(EOF, ACK)가 나갈 시간
    link.route(&output);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let elapsed = start.elapsed();
    let Some(status) = final_status else {
        error!("트랜잭션이 최종 상태 없이 끝남");
        std::process::exit(2);
    };

    println!(
        "{} {} -> {}: {} ({}), {} bytes in {:.2}s",
        status.trans,
        status.md.source_file_name,
        status.md.dest_file_name,
        status.final_status,
        status.condition_code,
        status.md.file_size,
        elapsed.as_secs_f64()
    );

    if status.final_status != FinalStatus::Successful {
        std::process::exit(1);
    }
    Ok(())
}
