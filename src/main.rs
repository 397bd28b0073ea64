use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing::{error, info, warn};

use config::{ImportOptions, PlaybackOptions, SkinningSpace};
use skinning::{model::SkinnedModel, playback::PlaybackControl};

mod config;
mod engine;
mod skinning;

#[derive(clap::Parser)]
struct Opts {
    /// Path to the glTF model (.gltf or .glb).
    path: PathBuf,

    /// Extra files whose animations are added as clips.
    #[arg(long)]
    motion: Vec<PathBuf>,

    /// Frames per second to bake clips at. Defaults to the file's rate, or 30.
    #[arg(long)]
    sampling_rate: Option<f32>,

    /// Clip to start with.
    #[arg(long)]
    clip: Option<String>,

    #[arg(long, default_value_t = 1.0)]
    speed: f32,

    /// Seconds of playback to simulate.
    #[arg(long, default_value_t = 2.0)]
    seconds: f32,

    /// Simulated render ticks per second.
    #[arg(long, default_value_t = 60.0)]
    tick_rate: f32,

    /// Playback keys applied one per simulated second: `n` next clip, `+` faster, `-` slower,
    /// `p` pause/resume.
    #[arg(long, default_value = "")]
    keys: String,

    #[arg(long, value_enum, default_value_t = SkinningSpace::MeshLocal)]
    skinning_space: SkinningSpace,

    /// Upload buffers to a headless GPU device every tick.
    #[arg(long)]
    gpu: bool,
}

impl Opts {
    fn import_options(&self) -> ImportOptions {
        ImportOptions {
            sampling_rate: self.sampling_rate,
            skinning_space: self.skinning_space,
            ..Default::default()
        }
    }

    fn playback_options(&self) -> PlaybackOptions {
        PlaybackOptions {
            clip: self.clip.clone(),
            speed: self.speed,
            seconds: self.seconds,
            tick_rate: self.tick_rate,
        }
    }
}

fn apply_key(key: char, model: &mut SkinnedModel, control: &mut PlaybackControl) {
    match key {
        'n' => model.next_clip(),
        '+' => control.speed_up(),
        '-' => control.slow_down(),
        'p' => control.toggle(),
        _ => warn!("Unknown playback key '{key}'"),
    }
    info!(
        "Key '{key}': speed {}, playing {}.",
        control.speed, control.playing
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().init();

    let opts = Opts::parse();
    let import_options = opts.import_options();
    let playback = opts.playback_options();

    let mut model = match SkinnedModel::load(&opts.path, &import_options) {
        Ok(model) => model,
        Err(err) => {
            error!("Could not load {}: {}", opts.path.display(), err);
            return ExitCode::FAILURE;
        }
    };

    for path in opts.motion.iter() {
        match model.load_motion(path) {
            Ok(count) => info!("Added {} clips from {}.", count, path.display()),
            Err(err) => {
                error!("Could not load motion {}: {}", path.display(), err);
                return ExitCode::FAILURE;
            }
        }
    }

    for mesh in model.meshes.iter() {
        info!(
            "{} (node {}) at {}: {} vertices, {} bones.",
            mesh.name,
            mesh.node,
            mesh.global_bind.w_axis.truncate(),
            mesh.assembled.vertices.len(),
            mesh.skeleton.len()
        );
        for subset in mesh.assembled.subsets.iter() {
            info!(
                "  {}: indices {}..{}",
                subset.name,
                subset.index_start,
                subset.index_start + subset.index_count,
            );
            if let Some(material) = mesh.materials.get(subset.material_slot) {
                info!(
                    "    material \"{}\": diffuse {}, maps {:?} / {:?} / {:?}",
                    material.name,
                    material.diffuse,
                    material.diffuse_texture,
                    material.normal_texture,
                    material.specular_texture
                );
            }
        }
        for clip in mesh.clips.iter() {
            info!(
                "  clip \"{}\": {} frames at {} fps",
                clip.name,
                clip.frame_count(),
                clip.sampling_rate
            );
        }
    }
    info!("Clips: {:?}", model.clip_names());

    if let Some(ref clip) = playback.clip {
        model.select_clip(clip);
    }

    let gpu = if opts.gpu {
        match engine::gpu::create_headless() {
            Ok(mut renderer) => {
                let meshes = engine::gpu::upload_model(&mut renderer, &model);
                let bytes: u64 = meshes.iter().map(|mesh| mesh.size(&renderer)).sum();
                info!("Uploaded {} meshes ({} bytes).", meshes.len(), bytes);
                Some((renderer, meshes))
            }
            Err(err) => {
                error!("{}", err);
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let mut control = PlaybackControl {
        speed: playback.speed,
        playing: true,
    };

    let tick_rate = playback.tick_rate.max(1.0);
    let delta = 1.0 / tick_rate;
    let tick_count = (playback.seconds * tick_rate).round() as usize;
    let ticks_per_second = tick_rate.round() as usize;
    let mut keys = opts.keys.chars();

    for tick in 0..tick_count {
        if tick > 0 && tick % ticks_per_second == 0 {
            if let Some(key) = keys.next() {
                apply_key(key, &mut model, &mut control);
            }
        }

        model.update(delta, &control);

        if let Some((ref renderer, ref meshes)) = gpu {
            if let Err(err) = engine::gpu::write_palettes(renderer, &model, meshes) {
                error!("{}", err);
                return ExitCode::FAILURE;
            }
        }

        if tick % ticks_per_second == 0 {
            for mesh in model.meshes.iter() {
                if let Some(clip) = mesh.current_clip() {
                    info!(
                        "[{:.2}s] {}: clip \"{}\" tick {:.3}s / {:.3}s",
                        tick as f32 * delta,
                        mesh.name,
                        clip.name,
                        mesh.state.tick,
                        clip.duration()
                    );
                }
            }
        }
    }

    info!("Simulated {} ticks.", tick_count);

    ExitCode::SUCCESS
}
