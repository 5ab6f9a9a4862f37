use crate::commands::print_outline;
use crate::config::Config;
use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::PathBuf;
use vellum_document::{Document, PositionKey, ShapeId, ShapeKind, ROOT_ID, SHAPES_SELECTOR, TEXT_SELECTOR};
use vellum_editor::{
    ArrayMove, CmdRepo, ManualClock, OpKind, OpPath, OpPayload, Outbox, SelectionUpdater, Sequencer, TextOp,
    TreeMove, TreeSlot,
};

type Replica = CmdRepo<Document, Outbox>;

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Number of replicas
    #[arg(short, long, default_value_t = 2)]
    pub clients: usize,

    /// Edits made by each replica
    #[arg(short, long, default_value_t = 50)]
    pub edits: usize,

    /// Random seed
    #[arg(short, long, default_value_t = 0)]
    pub seed: u64,

    /// Write the sequenced log to this file
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Print the final document
    #[arg(long)]
    pub show: bool,
}

/// Shapes of the seed document that random edits can address.
#[derive(Debug, Default)]
struct Targets {
    containers: Vec<ShapeId>,
    movable: Vec<ShapeId>,
    texts: Vec<ShapeId>,
}

impl Targets {
    fn scan(document: &Document) -> Self {
        let mut targets = Targets::default();
        let mut stack: Vec<(ShapeId, usize)> = document.children(ROOT_ID).into_iter().map(|id| (id, 1)).collect();
        while let Some((id, depth)) = stack.pop() {
            let Some(shape) = document.get_shape(&id) else {
                continue;
            };
            if matches!(shape.kind, ShapeKind::Page | ShapeKind::Frame | ShapeKind::Group) {
                targets.containers.push(id.clone());
            }
            if shape.kind == ShapeKind::Text {
                targets.texts.push(id.clone());
            }
            if depth > 1 {
                targets.movable.push(id.clone());
            }
            stack.extend(shape.children.iter().map(|child| (child.clone(), depth + 1)));
        }
        targets
    }
}

pub fn simulate(args: SimulateArgs, cwd: &str) -> Result<()> {
    if args.clients == 0 {
        return Err(anyhow!("At least one client is required"));
    }
    let config = Config::load(cwd)?;
    let seed_document = config.seed_document(cwd)?;
    let targets = Targets::scan(&seed_document);

    println!(
        "{} {} clients, {} edits each, seed {}",
        "🔀 Simulating".bright_blue().bold(),
        args.clients,
        args.edits,
        args.seed
    );

    let clock = ManualClock::new(0);
    let mut replicas: Vec<Replica> = (0..args.clients)
        .map(|index| {
            CmdRepo::with_config(
                format!("client-{}", index + 1),
                seed_document.clone(),
                Outbox::new(),
                config.repo.clone(),
            )
            .with_clock(clock.clone())
        })
        .collect();
    let mut server = Sequencer::new();
    let mut rng = SmallRng::seed_from_u64(args.seed);

    let mut remaining = vec![args.edits; args.clients];
    let mut rejected = 0;
    while remaining.iter().any(|&left| left > 0) {
        let client = rng.gen_range(0..args.clients);
        match rng.gen_range(0..10) {
            0..=5 if remaining[client] > 0 => {
                remaining[client] -= 1;
                let replica = &mut replicas[client];
                let Some(op) = random_edit(&mut rng, replica.document(), &targets) else {
                    continue;
                };
                let mut cmd = replica.build_cmd([op]);
                if cmd.ops.iter().any(|op| op.kind() == OpKind::CrdtTree) {
                    cmd = cmd.with_updater(SelectionUpdater::SelectShapes);
                }
                if let Err(e) = replica.post(cmd) {
                    if e.is_integrity() {
                        return Err(e.into());
                    }
                    tracing::debug!("[simulate] {} rejected an edit: {}", replica.client_id(), e);
                    rejected += 1;
                }
            }
            6 | 7 => upload(&mut replicas[client], &mut server),
            _ => deliver(&mut replicas[client], &server)?,
        }
        clock.advance(rng.gen_range(0..200));
    }

    settle(&mut replicas, &mut server, &clock)?;

    let expected = replicas[0].document().snapshot();
    let diverged: Vec<&str> = replicas
        .iter()
        .filter(|replica| replica.document().snapshot() != expected)
        .map(|replica| replica.client_id())
        .collect();

    if let Some(out) = &args.out {
        fs::write(out, serde_json::to_string_pretty(server.log())?)?;
        println!("  {} Wrote log to {}", "✓".green(), out.display());
    }

    if !diverged.is_empty() {
        println!("  {} Diverged: {}", "✗".red(), diverged.join(", "));
        return Err(anyhow!("{} replicas diverged", diverged.len()));
    }

    println!(
        "  {} {} replicas converged at version {} ({} rejected locally)",
        "✓".green(),
        replicas.len(),
        server.version(),
        rejected
    );
    if args.show {
        println!();
        print_outline(replicas[0].document());
    }
    Ok(())
}

fn random_edit(rng: &mut SmallRng, document: &Document, targets: &Targets) -> Option<(OpPath, OpPayload)> {
    match rng.gen_range(0..5) {
        0 => {
            let id = pick(rng, &targets.texts)?;
            let content = document.text(id).map(|text| text.len()).unwrap_or(0).saturating_sub(1);
            let op = if content > 0 && rng.gen_bool(0.3) {
                let start = rng.gen_range(0..content);
                TextOp::remove(start, rng.gen_range(1..=(content - start).min(3)))
            } else {
                let word: String = (0..rng.gen_range(1..4))
                    .map(|_| (b'a' + rng.gen_range(0..26u8)) as char)
                    .collect();
                TextOp::insert(rng.gen_range(0..=content), &word)
            };
            Some((OpPath::new([id.as_str(), TEXT_SELECTOR]), OpPayload::Text(vec![op])))
        }
        1 => {
            let id = pick(rng, &targets.movable)?;
            Some((
                OpPath::new([id.as_str(), "x"]),
                OpPayload::IdSet {
                    value: Some(serde_json::json!(rng.gen_range(0..500i64))),
                },
            ))
        }
        2 => {
            let shape = pick(rng, &targets.movable)?.clone();
            let parent = pick(rng, &targets.containers)?.clone();
            // half of the moves go through the page the shape is on
            let scope = match page_of(document, &shape) {
                Some(page) if rng.gen_bool(0.5) => page,
                _ => ROOT_ID.to_string(),
            };
            Some((
                OpPath::new([scope, SHAPES_SELECTOR.to_string()]),
                OpPayload::CrdtTree(TreeMove {
                    shape,
                    to: Some(TreeSlot {
                        parent,
                        key: PositionKey::from_digits(vec![rng.gen_range(1..100)]),
                    }),
                    data: None,
                }),
            ))
        }
        3 => {
            let id = pick(rng, &targets.movable)?;
            let item = format!("fill-{}", rng.gen_range(1..4));
            Some((
                OpPath::new([id.as_str(), "fills", item.as_str(), "opacity"]),
                OpPayload::IdSet {
                    value: Some(serde_json::json!(rng.gen_range(0..=10) as f64 / 10.0)),
                },
            ))
        }
        _ => {
            let id = pick(rng, &targets.movable)?;
            let to = rng.gen_bool(0.8).then(|| PositionKey::from_digits(vec![rng.gen_range(1..100)]));
            Some((
                OpPath::new([id.as_str(), "fills"]),
                OpPayload::CrdtArray(ArrayMove {
                    item: format!("fill-{}", rng.gen_range(1..4)),
                    to,
                    data: Some(serde_json::json!({ "color": format!("#{:06x}", rng.gen_range(0..0xffffffu32)) })),
                }),
            ))
        }
    }
}

/// Top-level page containing `id`, if it is attached.
fn page_of(document: &Document, id: &str) -> Option<ShapeId> {
    let mut current = id.to_string();
    loop {
        let parent = document.get_shape(&current)?.placement.as_ref()?.parent.clone();
        if parent == ROOT_ID {
            return Some(current);
        }
        current = parent;
    }
}

fn pick<'a>(rng: &mut SmallRng, ids: &'a [ShapeId]) -> Option<&'a ShapeId> {
    if ids.is_empty() {
        return None;
    }
    ids.get(rng.gen_range(0..ids.len()))
}

fn upload(replica: &mut Replica, server: &mut Sequencer) {
    for batch in replica.transport_mut().drain() {
        server.submit(&batch);
    }
}

fn deliver(replica: &mut Replica, server: &Sequencer) -> Result<()> {
    let missing = server.since(replica.last_known_version());
    replica.receive(missing)?;
    Ok(())
}

/// Exchange batches until every replica has every cmd acknowledged.
fn settle(replicas: &mut [Replica], server: &mut Sequencer, clock: &ManualClock) -> Result<()> {
    for _ in 0..64 {
        for replica in replicas.iter_mut() {
            upload(replica, server);
        }
        for replica in replicas.iter_mut() {
            deliver(replica, server)?;
        }
        if replicas
            .iter()
            .all(|replica| replica.is_settled() && replica.version() == server.version())
        {
            return Ok(());
        }
        clock.advance(1_000);
        for replica in replicas.iter_mut() {
            replica.tick()?;
        }
    }
    Err(anyhow!("Replicas did not settle"))
}
