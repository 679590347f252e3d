use briny_grad::config::TrainConfig;
use briny_grad::session::{Batch, TrainingSession};
use briny_grad::tensors::Tensor;
use rand::{Rng, SeedableRng, rngs::StdRng};

const CLASSES: usize = 10;
const SIDE: usize = 28;
const PIXELS: usize = SIDE * SIDE;

/// Draws a noisy "digit": class `k` lights up rows `2k..2k + 3` of the image.
fn sample(class: usize, rng: &mut StdRng) -> Vec<f64> {
    (0..PIXELS)
        .map(|p| {
            let row = p / SIDE;
            let lit = (2 * class..2 * class + 3).contains(&row);
            let base = if lit { 0.9 } else { 0.0 };
            (base + rng.random_range(0.0..0.1f64)).min(1.0)
        })
        .collect()
}

fn make_batches(count: usize, batch_size: usize, rng: &mut StdRng) -> briny_grad::Result<Vec<Batch>> {
    (0..count)
        .map(|_| {
            let labels: Vec<usize> = (0..batch_size).map(|_| rng.random_range(0..CLASSES)).collect();
            let data = labels.iter().flat_map(|&l| sample(l, rng)).collect();
            Batch::new(Tensor::new(vec![batch_size, 1, SIDE, SIDE], data), labels)
        })
        .collect()
}

fn main() -> briny_grad::Result<()> {
    let mut rng = StdRng::seed_from_u64(2024);
    let batches = make_batches(20, 64, &mut rng)?;

    let config = TrainConfig::default()
        .with_learning_rate(0.003)
        .with_momentum(0.9)
        .with_epochs(5)
        .with_log_every(0);
    let mut session = TrainingSession::mlp(&[PIXELS, 128, 64, CLASSES], config)?;

    println!("Beginning training...");
    for _ in 0..session.config().epochs {
        let report = session.train_epoch(&batches)?;
        println!(
            "=== EPOCH {} ===\nTRAINING: loss={:.6} over {} batches",
            report.epoch,
            report.mean_loss(),
            report.batches
        );
    }

    let probe = Tensor::new(vec![1, PIXELS], sample(3, &mut rng));
    let probs = session.predict_proba(&probe)?;
    println!("\nClass probabilities for a sample of digit 3:");
    for (class, p) in probs.data.iter().enumerate() {
        println!("  {class}: {p:.4}");
    }

    Ok(())
}
