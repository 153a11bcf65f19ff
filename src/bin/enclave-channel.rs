//! enclave-channel CLI: attested secure channels between enclaves
//!
//! Commands:
//!   enclave-channel demo      two in-process enclaves attest each other and talk
//!   enclave-channel attest    self-attestation round trip
//!   enclave-channel measure   print the measurement of an enclave image
//!   enclave-channel config    write a default configuration file

use enclave_channel::attestation::{
    AttestationProvider, EnclaveImage, EnclaveMeasurement, IdentityPolicy, SimulatedEnclave,
    SimulatedPlatform,
};
use enclave_channel::{
    AttestationReport, ChannelConfig, ChannelError, ChannelResult, CryptoIdentity, HandshakeEngine,
};
use std::env;
use std::sync::Arc;
use tokio::sync::mpsc;

const CONFIG_FILE: &str = "enclave-channel.json";
const DEMO_SIGNER: &str = "enclave-channel-demo-signer";
const INITIATOR_SECRET: u64 = 0x5eed_0000_0000_002a;
const RESPONDER_SECRET: u64 = 0x0000_0000_0001_e240;

fn print_usage() {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║        enclave-channel — attested enclave-to-enclave         ║
║        key establishment and encrypted messaging             ║
╚══════════════════════════════════════════════════════════════╝

Usage: enclave-channel <command> [options]

Commands:
  demo                            Run the full two-enclave handshake demo
  attest                          Generate and verify a report for this enclave
  measure <code-id> <signer>      Print MRENCLAVE/MRSIGNER for an enclave image
  config  [path]                  Write a default config (default: {})

Examples:
  enclave-channel demo
  enclave-channel measure payments-enclave acme-release-key
  RUST_LOG=debug enclave-channel demo
"#,
        CONFIG_FILE
    );
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "demo" => cmd_demo().await,
        "attest" => cmd_attest(),
        "measure" => cmd_measure(&args[2..]),
        "config" => cmd_config(&args[2..]),
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
        }
    }
}

type Engine = HandshakeEngine<SimulatedEnclave>;

/// Frames carried between the two demo enclaves
#[derive(Debug)]
enum Frame {
    Report { public_key: Vec<u8>, report: Vec<u8> },
    Handshake(Vec<u8>),
    Message(Vec<u8>),
    /// Encrypted big-endian u64 secret
    Secret(Vec<u8>),
}

fn decode_secret(bytes: &[u8]) -> ChannelResult<u64> {
    let bytes: [u8; 8] = bytes.try_into().map_err(|_| {
        ChannelError::MalformedInput(format!("secret is {} bytes, expected 8", bytes.len()))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Add our secret to the one a peer sent; the sum wraps
fn combine_secrets(own: u64, received: &[u8]) -> ChannelResult<u64> {
    Ok(own.wrapping_add(decode_secret(received)?))
}

fn demo_engine(platform: &SimulatedPlatform, name: &str, peer: &str) -> ChannelResult<Engine> {
    let enclave = platform.launch(&EnclaveImage::new(name, DEMO_SIGNER));
    let peer_measurement = EnclaveMeasurement::compute(&EnclaveImage::new(peer, DEMO_SIGNER));
    let config = ChannelConfig::new(name).with_peer_policy(
        peer,
        IdentityPolicy::pinned(&peer_measurement.mrenclave, &peer_measurement.mrsigner),
    );
    HandshakeEngine::new(CryptoIdentity::generate(name), enclave, config)
}

/// Responder side: answer whatever arrives until the inbox closes
async fn run_responder(
    engine: Arc<Engine>,
    peer: String,
    mut inbox: mpsc::Receiver<Frame>,
    outbox: mpsc::Sender<Frame>,
) -> ChannelResult<usize> {
    let mut handled = 0;
    while let Some(frame) = inbox.recv().await {
        handled += 1;
        let reply = match frame {
            Frame::Report { public_key, report } => {
                engine.verify_report_and_set_pubkey(
                    &peer,
                    &public_key,
                    &AttestationReport::from_bytes(report),
                )?;
                let (public_key, report) = engine.send_report_to(&peer)?;
                Some(Frame::Report {
                    public_key,
                    report: report.into_bytes(),
                })
            }
            Frame::Handshake(bytes) => engine
                .acknowledge_secure_channel(&peer, &bytes)?
                .map(Frame::Handshake),
            Frame::Message(bytes) => {
                let plaintext = engine.process_encrypted_message(&peer, &bytes)?;
                println!(
                    "  [{}] received: '{}'",
                    engine.name(),
                    String::from_utf8_lossy(&plaintext)
                );
                let mut echo = b"ack: ".to_vec();
                echo.extend_from_slice(&plaintext);
                Some(Frame::Message(
                    engine.generate_encrypted_message(&peer, &echo)?,
                ))
            }
            Frame::Secret(bytes) => {
                let received = engine.process_encrypted_message(&peer, &bytes)?;
                engine.provision_secret(&RESPONDER_SECRET.to_be_bytes())?;
                let combined = combine_secrets(RESPONDER_SECRET, &received)?;
                println!(
                    "  [{}] added its secret to the one received from {}",
                    engine.name(),
                    peer
                );
                Some(Frame::Secret(
                    engine.generate_encrypted_message(&peer, &combined.to_be_bytes())?,
                ))
            }
        };
        if let Some(reply) = reply {
            if outbox.send(reply).await.is_err() {
                break;
            }
        }
    }
    println!("  {}", engine.session_summary(&peer)?.summary());
    engine.shutdown()?;
    Ok(handled)
}

async fn recv_frame(inbox: &mut mpsc::Receiver<Frame>) -> ChannelResult<Frame> {
    inbox
        .recv()
        .await
        .ok_or_else(|| ChannelError::NoActiveSession("transport closed".into()))
}

async fn send_frame(outbox: &mpsc::Sender<Frame>, frame: Frame) -> ChannelResult<()> {
    outbox
        .send(frame)
        .await
        .map_err(|_| ChannelError::NoActiveSession("transport closed".into()))
}

/// Initiator side: drive the whole handshake and a short conversation
async fn run_initiator(
    engine: &Engine,
    peer: &str,
    inbox: &mut mpsc::Receiver<Frame>,
    outbox: &mpsc::Sender<Frame>,
) -> ChannelResult<()> {
    println!("\n  Step 1: {} sends its report to {}", engine.name(), peer);
    let (public_key, report) = engine.send_report_to(peer)?;
    send_frame(
        outbox,
        Frame::Report {
            public_key,
            report: report.into_bytes(),
        },
    )
    .await?;

    println!("  Step 2: {} verifies the report from {}", engine.name(), peer);
    match recv_frame(inbox).await? {
        Frame::Report { public_key, report } => engine.verify_report_and_set_pubkey(
            peer,
            &public_key,
            &AttestationReport::from_bytes(report),
        )?,
        other => {
            return Err(ChannelError::MalformedInput(format!(
                "expected a report, got {:?}",
                other
            )))
        }
    }

    println!("  Step 3: {} offers a session key", engine.name());
    let offer = engine.establish_secure_channel(peer)?;
    send_frame(outbox, Frame::Handshake(offer)).await?;

    match recv_frame(inbox).await? {
        Frame::Handshake(confirm) => {
            engine.acknowledge_secure_channel(peer, &confirm)?;
        }
        other => {
            return Err(ChannelError::MalformedInput(format!(
                "expected a key confirmation, got {:?}",
                other
            )))
        }
    }
    println!("  Step 4: key confirmed, channel established");
    println!("  {}", engine.session_summary(peer)?.summary());

    println!("\n  Step 5: exchanging encrypted messages");
    for text in ["hello", "attested and encrypted"] {
        let envelope = engine.generate_encrypted_message(peer, text.as_bytes())?;
        send_frame(outbox, Frame::Message(envelope)).await?;
        if let Frame::Message(reply) = recv_frame(inbox).await? {
            let plaintext = engine.process_encrypted_message(peer, &reply)?;
            println!(
                "  [{}] received: '{}'",
                engine.name(),
                String::from_utf8_lossy(&plaintext)
            );
        }
    }

    println!("\n  Step 6: provisioning a secret and sending it over the channel");
    engine.provision_secret(&INITIATOR_SECRET.to_be_bytes())?;
    let envelope = engine.generate_secret_message(peer)?;
    send_frame(outbox, Frame::Secret(envelope)).await?;
    match recv_frame(inbox).await? {
        Frame::Secret(reply) => {
            let combined = decode_secret(&engine.process_encrypted_message(peer, &reply)?)?;
            println!(
                "  [{}] combined secret: {:#018x} (expected {:#018x})",
                engine.name(),
                combined,
                INITIATOR_SECRET.wrapping_add(RESPONDER_SECRET)
            );
        }
        other => {
            return Err(ChannelError::MalformedInput(format!(
                "expected a combined secret, got {:?}",
                other
            )))
        }
    }

    println!("  {}", engine.session_summary(peer)?.summary());
    Ok(())
}

async fn cmd_demo() {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║              enclave-channel — Full Demo                     ║
║       Mutual attestation + key exchange + messaging          ║
╚══════════════════════════════════════════════════════════════╝
"#
    );

    let platform = SimulatedPlatform::new();
    let (a, b) = match (
        demo_engine(&platform, "enclave-a", "enclave-b"),
        demo_engine(&platform, "enclave-b", "enclave-a"),
    ) {
        (Ok(a), Ok(b)) => (a, Arc::new(b)),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("  Failed to start enclaves: {}", e);
            return;
        }
    };

    let (to_b, b_inbox) = mpsc::channel(16);
    let (to_a, mut a_inbox) = mpsc::channel(16);
    let responder = tokio::spawn(run_responder(b, "enclave-a".into(), b_inbox, to_a));

    if let Err(e) = run_initiator(&a, "enclave-b", &mut a_inbox, &to_b).await {
        eprintln!("  Demo failed: {} ({:?})", e, e.kind());
    }
    drop(to_b);

    match responder.await {
        Ok(Ok(frames)) => println!("  Responder handled {} frames", frames),
        Ok(Err(e)) => eprintln!("  Responder failed: {} ({:?})", e, e.kind()),
        Err(e) => eprintln!("  Responder task panicked: {}", e),
    }
    if let Err(e) = a.shutdown() {
        eprintln!("  Shutdown failed: {}", e);
    }
    println!("\n  Demo complete.");
}

fn cmd_attest() {
    println!("\n  Self-attestation...");
    println!("  {}", "-".repeat(50));

    let platform = SimulatedPlatform::new();
    let image = EnclaveImage::new("enclave-channel-self-test", DEMO_SIGNER);
    let enclave = platform.launch(&image);
    let identity = CryptoIdentity::generate("self");

    let report = match enclave.generate_report(&identity.public_key_bytes()) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("  Report generation failed: {}", e);
            return;
        }
    };
    let measurement = enclave.measurement();
    let policy = IdentityPolicy::pinned(&measurement.mrenclave, &measurement.mrsigner);

    println!("  Backend:         {}", enclave.backend().name());
    println!("  Security Level:  {:?}", enclave.security_level());
    println!("  MRENCLAVE:       {}...", &measurement.mrenclave[..16]);
    println!("  MRSIGNER:        {}...", &measurement.mrsigner[..16]);
    println!("  Public key:      {}", identity.public_key().fingerprint());
    println!("  Report:          {} bytes", report.len());

    match enclave.verify_report(&report, &policy) {
        Ok(verified) => {
            let bound = verified.bound_public_key == identity.public_key_bytes();
            println!("  Verdict:         trusted (key bound: {})", bound);
        }
        Err(rejection) => println!("  Verdict:         rejected ({:?})", rejection.code),
    }

    let strict = IdentityPolicy::strict(
        vec![measurement.mrenclave.clone()],
        vec![measurement.mrsigner.clone()],
    );
    match enclave.verify_report(&report, &strict) {
        Ok(_) => println!("  Strict policy:   trusted"),
        Err(rejection) => println!("  Strict policy:   rejected ({:?})", rejection.code),
    }
}

fn cmd_measure(args: &[String]) {
    if args.len() < 2 {
        eprintln!("Usage: enclave-channel measure <code-id> <signer> [svn] [product-id]");
        return;
    }

    let mut image = EnclaveImage::new(&args[0], &args[1]);
    if let Some(svn) = args.get(2).and_then(|s| s.parse().ok()) {
        image = image.with_svn(svn);
    }
    if let Some(product_id) = args.get(3).and_then(|s| s.parse().ok()) {
        image = image.with_product_id(product_id);
    }
    let measurement = EnclaveMeasurement::compute(&image);

    println!("\n  Measurement of '{}' signed by '{}':", args[0], args[1]);
    println!("  MRENCLAVE:  {}", measurement.mrenclave);
    println!("  MRSIGNER:   {}", measurement.mrsigner);
    println!("  Product ID: {}", measurement.product_id);
    println!("  SVN:        {}", measurement.isv_svn);

    let policy = IdentityPolicy::pinned(&measurement.mrenclave, &measurement.mrsigner);
    match serde_json::to_string_pretty(&policy) {
        Ok(json) => println!("\n  Pinned policy:\n{}", json),
        Err(e) => eprintln!("  Failed to serialize policy: {}", e),
    }
}

fn cmd_config(args: &[String]) {
    let path = args.first().map(String::as_str).unwrap_or(CONFIG_FILE);
    let config = ChannelConfig::default().with_default_policy(IdentityPolicy::default());
    match config.save(path) {
        Ok(()) => println!("\n  Wrote default config to {}", path),
        Err(e) => eprintln!("  Failed to write config: {}", e),
    }
}
