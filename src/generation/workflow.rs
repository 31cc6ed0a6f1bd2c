//! ComfyUI prompt graph construction.
//!
//! Node ids are fixed so the graph stays readable in ComfyUI's own history
//! view. LoRA loaders chain between the checkpoint and every consumer of
//! its model and clip outputs; the hi-res fix upscales the first decode
//! and samples it again before saving.

use super::settings::GenerationSettings;
use serde_json::{json, Map, Value};

const CHECKPOINT: &str = "4";
const SAMPLER: &str = "3";
const LATENT: &str = "5";
const POSITIVE: &str = "6";
const NEGATIVE: &str = "7";
const DECODE: &str = "8";
const SAVE: &str = "9";
const VAE: &str = "10";
const LORA1: &str = "14";
const LORA2: &str = "15";
const HIRES_ENCODE: &str = "65";
const HIRES_SAMPLER: &str = "66";
const HIRES_UPSCALE: &str = "67";
const HIRES_DECODE: &str = "68";

pub const FILENAME_PREFIX: &str = "vintagecast";

/// Build the API-format prompt for `settings`. `seed` feeds every sampler.
pub fn build_prompt(settings: &GenerationSettings, seed: u64) -> Value {
    let mut graph = Map::new();
    let mut node = |id: &str, value: Value| {
        graph.insert(id.to_string(), value);
    };

    node(
        CHECKPOINT,
        json!({
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": settings.model },
        }),
    );
    node(
        VAE,
        json!({
            "class_type": "VAELoader",
            "inputs": { "vae_name": settings.vae },
        }),
    );
    node(
        LATENT,
        json!({
            "class_type": "EmptyLatentImage",
            "inputs": {
                "width": settings.width,
                "height": settings.height,
                "batch_size": 1,
            },
        }),
    );

    let mut model_from = CHECKPOINT;
    for (id, lora) in [(LORA1, settings.lora1()), (LORA2, settings.lora2())] {
        let Some((name, strength)) = lora else {
            continue;
        };
        node(
            id,
            json!({
                "class_type": "LoraLoader",
                "inputs": {
                    "lora_name": name,
                    "strength_model": strength,
                    "strength_clip": strength,
                    "model": [model_from, 0],
                    "clip": [model_from, 1],
                },
            }),
        );
        model_from = id;
    }

    node(
        POSITIVE,
        json!({
            "class_type": "CLIPTextEncode",
            "inputs": { "text": settings.positive_prompt, "clip": [model_from, 1] },
        }),
    );
    node(
        NEGATIVE,
        json!({
            "class_type": "CLIPTextEncode",
            "inputs": { "text": settings.negative_prompt, "clip": [model_from, 1] },
        }),
    );
    node(
        SAMPLER,
        sampler(settings, seed, settings.steps, settings.denoise, model_from, LATENT),
    );
    node(
        DECODE,
        json!({
            "class_type": "VAEDecode",
            "inputs": { "samples": [SAMPLER, 0], "vae": [VAE, 0] },
        }),
    );

    let mut save_from = DECODE;
    if settings.hires_enabled {
        node(
            HIRES_UPSCALE,
            json!({
                "class_type": "ImageScaleBy",
                "inputs": {
                    "upscale_method": "bicubic",
                    "scale_by": 1.5,
                    "image": [DECODE, 0],
                },
            }),
        );
        node(
            HIRES_ENCODE,
            json!({
                "class_type": "VAEEncode",
                "inputs": { "pixels": [HIRES_UPSCALE, 0], "vae": [VAE, 0] },
            }),
        );
        node(
            HIRES_SAMPLER,
            sampler(
                settings,
                seed,
                settings.hires_steps,
                settings.hires_denoise,
                model_from,
                HIRES_ENCODE,
            ),
        );
        node(
            HIRES_DECODE,
            json!({
                "class_type": "VAEDecode",
                "inputs": { "samples": [HIRES_SAMPLER, 0], "vae": [VAE, 0] },
            }),
        );
        save_from = HIRES_DECODE;
    }

    node(
        SAVE,
        json!({
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": FILENAME_PREFIX, "images": [save_from, 0] },
        }),
    );

    Value::Object(graph)
}

fn sampler(
    settings: &GenerationSettings,
    seed: u64,
    steps: u32,
    denoise: f64,
    model_from: &str,
    latent_from: &str,
) -> Value {
    json!({
        "class_type": "KSampler",
        "inputs": {
            "seed": seed,
            "steps": steps,
            "cfg": settings.cfg,
            "sampler_name": settings.sampler_name,
            "scheduler": settings.scheduler,
            "denoise": denoise,
            "model": [model_from, 0],
            "positive": [POSITIVE, 0],
            "negative": [NEGATIVE, 0],
            "latent_image": [latent_from, 0],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> GenerationSettings {
        let mut s = GenerationSettings::with_model("sd15.safetensors");
        s.positive_prompt = "a red bicycle".into();
        s
    }

    #[test]
    fn base_graph() {
        let prompt = build_prompt(&settings(), 42);
        let graph = prompt.as_object().unwrap();
        let mut ids: Vec<&str> = graph.keys().map(String::as_str).collect();
        ids.sort();
        assert_eq!(ids, ["10", "3", "4", "5", "6", "7", "8", "9"]);

        assert_eq!(prompt["4"]["inputs"]["ckpt_name"], "sd15.safetensors");
        assert_eq!(prompt["3"]["inputs"]["seed"], 42);
        assert_eq!(prompt["3"]["inputs"]["model"], json!(["4", 0]));
        assert_eq!(prompt["6"]["inputs"]["clip"], json!(["4", 1]));
        assert_eq!(prompt["6"]["inputs"]["text"], "a red bicycle");
        assert_eq!(prompt["9"]["inputs"]["images"], json!(["8", 0]));
        assert_eq!(prompt["5"]["inputs"]["width"], 680);
    }

    #[test]
    fn loras_chain_in_order() {
        let mut s = settings();
        s.lora1_name = "style.safetensors".into();
        s.lora2_name = "detail.safetensors".into();
        s.lora2_strength = 0.5;
        let prompt = build_prompt(&s, 1);

        assert_eq!(prompt["14"]["inputs"]["model"], json!(["4", 0]));
        assert_eq!(prompt["15"]["inputs"]["model"], json!(["14", 0]));
        assert_eq!(prompt["15"]["inputs"]["clip"], json!(["14", 1]));
        assert_eq!(prompt["15"]["inputs"]["strength_model"], 0.5);
        assert_eq!(prompt["3"]["inputs"]["model"], json!(["15", 0]));
        assert_eq!(prompt["7"]["inputs"]["clip"], json!(["15", 1]));
    }

    #[test]
    fn second_lora_alone_reads_checkpoint() {
        let mut s = settings();
        s.lora2_name = "detail.safetensors".into();
        let prompt = build_prompt(&s, 1);
        assert!(prompt.get("14").is_none());
        assert_eq!(prompt["15"]["inputs"]["model"], json!(["4", 0]));
        assert_eq!(prompt["3"]["inputs"]["model"], json!(["15", 0]));
    }

    #[test]
    fn hires_reroutes_save() {
        let mut s = settings();
        s.hires_enabled = true;
        let prompt = build_prompt(&s, 7);

        assert_eq!(prompt["67"]["inputs"]["image"], json!(["8", 0]));
        assert_eq!(prompt["65"]["inputs"]["pixels"], json!(["67", 0]));
        assert_eq!(prompt["66"]["inputs"]["latent_image"], json!(["65", 0]));
        assert_eq!(prompt["66"]["inputs"]["steps"], 16);
        assert_eq!(prompt["66"]["inputs"]["denoise"], 0.8);
        assert_eq!(prompt["9"]["inputs"]["images"], json!(["68", 0]));
    }
}
