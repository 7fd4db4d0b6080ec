use std::time::Duration;

use livedata_api::TopicRole;
use livedata_api::schema::Payload;
use livedata_engine::TcpProducer;

use super::config::Effective;
use super::domain::{Acquisition, Rng, now_ms};
use super::error::RunGenError;

// ═══════════════════════════════════════════════════════════════
//  Main dispatch
// ═══════════════════════════════════════════════════════════════

pub async fn run(args: &Effective) -> Result<(), RunGenError> {
    let producer = TcpProducer::connect(&args.address)?;
    tracing::info!(address = %args.address, "connected");

    for role in TopicRole::ALL {
        let topic = role.topic_name(&args.instrument);
        if producer.create_topic(&topic, args.partitions)? {
            tracing::info!(topic = %topic, partitions = args.partitions, "created topic");
        }
    }

    let mut rng = Rng::new(args.seed);
    let mut acq = Acquisition::new(args, now_ms());
    let publisher = Publisher {
        producer: &producer,
        instrument: &args.instrument,
    };

    publisher.send(TopicRole::DetSpecMap, acq.mapping().into())?;
    publisher.send(TopicRole::RunInfo, acq.run_start().into())?;

    println!("Run generator");
    println!("  broker     : {}", args.address);
    println!("  instrument : {}", args.instrument);
    println!("  run        : {}", args.run_number);
    println!("  spectra    : {}", args.spectra);
    println!("  periods    : {}", args.periods);
    println!("  rate       : {:.1} frames/s", args.rate);
    if args.frames > 0 {
        println!("  frames     : {}", args.frames);
    }
    println!();

    let result = run_frames(args, &publisher, &mut acq, &mut rng).await;

    publisher.send(TopicRole::RunInfo, acq.run_stop(now_ms()).into())?;
    println!("\n  run {} stopped after {} frames", args.run_number, acq.frames_sent());
    result
}

// ═══════════════════════════════════════════════════════════════
//  Frame loop
// ═══════════════════════════════════════════════════════════════

async fn run_frames(
    args: &Effective,
    publisher: &Publisher<'_>,
    acq: &mut Acquisition,
    rng: &mut Rng,
) -> Result<(), RunGenError> {
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / args.rate));
    let start = std::time::Instant::now();

    println!("Sending... (Ctrl+C to stop)");

    loop {
        if args.frames > 0 && acq.frames_sent() >= args.frames {
            return Ok(());
        }
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                return Ok(());
            }
            _ = interval.tick() => {
                let now = now_ms();
                let frame = acq.next_frame(rng, now);
                publisher.send(TopicRole::Events, frame.into())?;
                let sent = acq.frames_sent();

                if args.sample_every > 0 && sent % args.sample_every == 0 {
                    publisher.send(TopicRole::SampleEnv, acq.sample_log(rng, now).into())?;
                }
                if args.histogram_every > 0 && sent % args.histogram_every == 0 {
                    for hist in acq.histograms() {
                        publisher.send(TopicRole::Histograms, hist.into())?;
                    }
                }
                if sent % 100 == 0 {
                    let elapsed = start.elapsed();
                    eprint!("\r  {sent} frames ({:.1} frames/s)", sent as f64 / elapsed.as_secs_f64());
                }
            }
        }
    }
}

struct Publisher<'a> {
    producer: &'a TcpProducer,
    instrument: &'a str,
}

impl Publisher<'_> {
    fn send(&self, role: TopicRole, payload: Payload) -> Result<(), RunGenError> {
        let topic = role.topic_name(self.instrument);
        let (partition, offset) = self
            .producer
            .produce(&topic, None, payload.encode(), now_ms())?;
        tracing::debug!(topic = %topic, kind = payload.kind(), partition, offset, "sent");
        Ok(())
    }
}
