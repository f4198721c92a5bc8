/// Digitize one signal track through three GEM chambers, pile up two
/// background samples on top of it and print the result.
use anyhow::Result;
use gemdig::config::DigitizationParameters;
use gemdig::geometry::DetectorBox;
use gemdig::hit::{HitSegment, ParticleType, SimHitData};
use gemdig::readout::{GemChamber, GemPlane, Spectrometer};
use gemdig::Digitizer;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::FRAC_PI_2;

const PARAMETERS: &str = "\
# Ar/CO2 70/30
ratedig.gasionwidth = 26
ratedig.gasdiffusion = 4.1e4
ratedig.gasdriftvelocity = 5.5e7
ratedig.avalanchefiducialband = 10
ratedig.avalanchechargestatistics = 0
ratedig.gainmean = 8000
ratedig.gain0 = 20
ratedig.entrance_ref = 0
ratedig.zrout = 9.185
ratedig.avalateraluncertainty = 0.1
ratedig.max_ion = 200
ratedig.avalanche_range = 10
ratedig.ava_model = 2
ratedig.ava_gain = 20
ratedig.x_integral_step_per_pitch = 4
ratedig.y_integral_step_per_pitch = 4
ratedig.triggeroffset = 0 2.5 5
ratedig.triggerjitter = 2
ratedig.elesamplingpoints = 6
ratedig.elesamplingperiod = 25
ratedig.pulsenoisesigma = 5
ratedig.adcoffset = 0
ratedig.adcgain = 10
ratedig.adcbits = 12
ratedig.gatewidth = 400
ratedig.pulseshapetau0 = 50
ratedig.pulseshapetau1 = 20
ratedig.do_crosstalk = 1
ratedig.crosstalk_mean = 0.1
ratedig.crosstalk_sigma = 0.01
ratedig.crosstalk_strip_apart = 32
ratedig.record_all_strips = 0
";

fn spectrometer() -> Spectrometer {
    (0..3)
        .map(|layer| {
            GemChamber::builder()
                .name(format!("gem{layer}"))
                .layer(layer)
                .detector_box(
                    DetectorBox::builder()
                        .magnet_distance(1750.0)
                        .distance(1500.0 + 100.0 * layer as f64)
                        .width(400.0)
                        .height(1500.0)
                        .pivot_angle(0.29)
                        .build(),
                )
                .planes(vec![
                    GemPlane::builder().n_strips(1000).pitch(0.4).build(),
                    GemPlane::builder()
                        .n_strips(3750)
                        .pitch(0.4)
                        .angle(FRAC_PI_2)
                        .build(),
                ])
                .build()
        })
        .collect()
}

fn track(source: u32, rng: &mut impl Rng) -> SimHitData {
    let x: f64 = rng.random_range(-150.0..150.0);
    let y: f64 = rng.random_range(-600.0..600.0);
    let (dx, dy): (f64, f64) = (rng.random_range(-0.1..0.1), rng.random_range(-0.1..0.1));

    let mut data = SimHitData::new(source);
    for chamber in 0..3 {
        let z = 100.0 * chamber as f64;
        let mut hit = HitSegment::new(
            chamber,
            Vector3::new(x + dx * z, y + dy * z, 0.0),
            Vector3::new(x + dx * (z + 3.0), y + dy * (z + 3.0), 3.0),
            rng.random_range(500.0..3000.0),
        );
        hit.particle_type = if source == 0 {
            ParticleType::Primary
        } else {
            ParticleType::Secondary
        };
        hit.pdg_id = 11;
        hit.momentum = Vector3::new(dx, dy, 1.0).normalize() * 2200.0;
        data.push(hit);
    }
    data
}

fn main() -> Result<()> {
    let parameters: DigitizationParameters = PARAMETERS.parse()?;
    println!("{parameters}");

    let geometry = spectrometer();
    let mut rng = StdRng::seed_from_u64(2024);
    let signal = track(0, &mut rng);
    let background = [track(1, &mut rng), track(2, &mut rng)];

    let mut digitizer = Digitizer::builder()
        .parameters(parameters)
        .geometry(&geometry)
        .rng(rng)
        .build()?;

    let summary = digitizer.digitize(&signal);
    println!("signal: {summary:?}");
    for data in &background {
        let summary = digitizer.additive_digitize(data);
        println!("background {}: {summary:?}", data.source);
    }

    print!("{}", digitizer.samples());
    let event = digitizer.finish_event();
    print!("{event}");
    println!("{} strips recorded", event.strips.len());

    Ok(())
}
