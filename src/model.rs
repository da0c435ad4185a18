use anyhow::{bail, Context, Result};
use ndarray::Array2;
use std::{collections::HashMap, fmt, path::Path};
use tch::{
    kind::Kind,
    nn::{self, Module, RNN},
    CModule, Device, IValue, Tensor,
};

use crate::meta::ModelMeta;
use crate::preprocess::Preprocessor;

/// Stacked batch-first LSTM followed by a linear head on the last time step.
/// Parameter names match a PyTorch `state_dict` of the same layout
/// (`lstm.weight_ih_l0`, ..., `head.weight`, `head.bias`).
#[derive(Debug)]
pub struct LstmNet {
    lstm: nn::LSTM,
    head: nn::Linear,
}

impl LstmNet {
    pub fn new(root: &nn::Path, meta: &ModelMeta) -> Self {
        let cfg = nn::RNNConfig {
            num_layers: meta.num_layers as i64,
            batch_first: true,
            ..Default::default()
        };
        let lstm = nn::lstm(
            root / "lstm",
            meta.input_dim as i64,
            meta.hidden_size as i64,
            cfg,
        );
        let head = nn::linear(
            root / "head",
            meta.hidden_size as i64,
            meta.out_len as i64,
            Default::default(),
        );
        Self { lstm, head }
    }

    /// xs: [B, T, F] -> [B, out_len]
    pub fn forward(&self, xs: &Tensor) -> Tensor {
        let (out, _) = self.lstm.seq(xs);
        let last = out.select(1, -1);
        self.head.forward(&last)
    }
}

/// Which loader stage produced the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Named tensors copied into a freshly built `LstmNet`.
    Structural,
    /// Self-contained TorchScript module.
    Opaque,
}

impl fmt::Display for LoadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadKind::Structural => write!(f, "structural"),
            LoadKind::Opaque => write!(f, "opaque"),
        }
    }
}

pub enum Net {
    Structural {
        // owns the parameters the LSTM layers point into
        _vs: nn::VarStore,
        net: LstmNet,
    },
    Opaque(CModule),
}

impl Net {
    pub fn kind(&self) -> LoadKind {
        match self {
            Net::Structural { .. } => LoadKind::Structural,
            Net::Opaque(_) => LoadKind::Opaque,
        }
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Net::Structural { net, .. } => Ok(net.forward(xs)),
            Net::Opaque(module) => run_opaque(module, xs),
        }
    }
}

/// Result of the two-stage artifact loader.
pub enum LoadOutcome {
    Structural(Net),
    Opaque(Net),
    Failed { structural: String, opaque: String },
}

impl fmt::Debug for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Structural(_) => write!(f, "Structural"),
            LoadOutcome::Opaque(_) => write!(f, "Opaque"),
            LoadOutcome::Failed { structural, opaque } => f
                .debug_struct("Failed")
                .field("structural", structural)
                .field("opaque", opaque)
                .finish(),
        }
    }
}

/// Try the artifact as a named-tensor archive for `LstmNet` first, then as a
/// TorchScript module. Both stages check shapes against `meta`.
pub fn load_network(model_path: &Path, meta: &ModelMeta, device: Device) -> LoadOutcome {
    let structural = match load_structural(model_path, meta, device) {
        Ok(net) => return LoadOutcome::Structural(net),
        Err(e) => format!("{e:#}"),
    };
    tracing::debug!("structural load failed ({}); trying TorchScript", structural);

    match load_opaque(model_path, meta, device) {
        Ok(net) => LoadOutcome::Opaque(net),
        Err(e) => LoadOutcome::Failed {
            structural,
            opaque: format!("{e:#}"),
        },
    }
}

// Left on every key when a checkpoint is saved as {"state_dict": ...}.
const STATE_DICT_PREFIX: &str = "state_dict.";

/// Named tensors from a libtorch archive, or a safetensors file when the
/// extension says so. Keys lose any `state_dict.` prefix.
fn read_named_tensors(model_path: &Path, device: Device) -> Result<HashMap<String, Tensor>> {
    let is_safetensors = model_path.extension().and_then(|e| e.to_str()) == Some("safetensors");
    let named = if is_safetensors {
        Tensor::read_safetensors(model_path)
    } else {
        Tensor::load_multi_with_device(model_path, device)
    }
    .with_context(|| format!("failed to read named tensors from {}", model_path.display()))?;

    named
        .into_iter()
        .map(|(name, tensor)| {
            let name = match name.strip_prefix(STATE_DICT_PREFIX) {
                Some(stripped) => stripped.to_string(),
                None => name,
            };
            Ok((name, tensor.f_to_device(device)?))
        })
        .collect()
}

fn load_structural(model_path: &Path, meta: &ModelMeta, device: Device) -> Result<Net> {
    let vs = nn::VarStore::new(device);
    let net = LstmNet::new(&vs.root(), meta);

    let named = read_named_tensors(model_path, device)?;

    let mut vars = vs.variables();
    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();
    for name in names {
        let src = named
            .get(name)
            .with_context(|| format!("artifact has no parameter {}", name))?;
        let expected = vars[name].size();
        if src.size() != expected {
            bail!(
                "shape mismatch for {}: artifact {:?}, network {:?}",
                name,
                src.size(),
                expected
            );
        }
    }
    for (name, var) in vars.iter_mut() {
        if let Some(src) = named.get(name) {
            tch::no_grad(|| var.f_copy_(src))
                .with_context(|| format!("failed to copy parameter {}", name))?;
        }
    }

    Ok(Net::Structural { _vs: vs, net })
}

fn load_opaque(model_path: &Path, meta: &ModelMeta, device: Device) -> Result<Net> {
    let mut module = CModule::load_on_device(model_path, device)
        .with_context(|| format!("failed to load TorchScript {}", model_path.display()))?;
    module.set_eval();

    // Probe output shape with a dummy forward; expect out_len values for B=1
    let dummy = Tensor::f_zeros(
        [1, meta.seq_len as i64, meta.input_dim as i64],
        (Kind::Float, device),
    )?;
    let out = tch::no_grad(|| run_opaque(&module, &dummy))?;
    let n: i64 = out.size().iter().product();
    if n != meta.out_len as i64 {
        bail!(
            "unexpected model output size: {:?} (out_len {})",
            out.size(),
            meta.out_len
        );
    }
    Ok(Net::Opaque(module))
}

fn run_opaque(module: &CModule, xs: &Tensor) -> Result<Tensor> {
    let out = module.forward_is(&[IValue::Tensor(xs.shallow_clone())])?;
    match out {
        IValue::Tensor(t) => Ok(t),
        IValue::Tuple(items) | IValue::GenericList(items) => match items.into_iter().next() {
            Some(IValue::Tensor(t)) => Ok(t),
            _ => bail!("TorchScript output has no leading tensor"),
        },
        other => bail!("unexpected TorchScript output {:?}", other),
    }
}

/// Loaded network plus the metadata it was validated against.
pub struct Model {
    net: Net,
    device: Device,
    pub meta: ModelMeta,
    pub preprocessor: Preprocessor,
}

impl Model {
    pub fn load(model_path: &Path, meta_path: &Path) -> Result<Self> {
        let device = Device::Cpu;
        let meta = ModelMeta::load(meta_path)?;

        if !model_path.exists() {
            bail!("model file not found: {}", model_path.display());
        }

        let net = match load_network(model_path, &meta, device) {
            LoadOutcome::Structural(net) | LoadOutcome::Opaque(net) => net,
            LoadOutcome::Failed { structural, opaque } => bail!(
                "model artifact {} unusable: structural load: {}; TorchScript load: {}",
                model_path.display(),
                structural,
                opaque
            ),
        };

        let preprocessor = Preprocessor::new(&meta);
        Ok(Self {
            net,
            device,
            meta,
            preprocessor,
        })
    }

    pub fn kind(&self) -> LoadKind {
        self.net.kind()
    }

    /// One no-grad forward pass over a standardized window, batch size 1.
    pub fn predict(&self, mat: &Array2<f32>) -> Result<Vec<f32>> {
        let (t, f) = mat.dim();
        if t != self.meta.seq_len || f != self.meta.input_dim {
            bail!(
                "input window {}x{} does not match model {}x{}",
                t,
                f,
                self.meta.seq_len,
                self.meta.input_dim
            );
        }

        let flat: Vec<f32> = mat.iter().copied().collect();
        let input = Tensor::from_slice(&flat)
            .reshape([1, t as i64, f as i64])
            .to_device(self.device);

        let y = tch::no_grad(|| self.net.forward(&input))?;
        let y = y.to_kind(Kind::Float).reshape([-1]);
        let n = y.size()[0];
        if n != self.meta.out_len as i64 {
            bail!("forecast length {} != out_len {}", n, self.meta.out_len);
        }
        Ok((0..n).map(|i| y.double_value(&[i]) as f32).collect())
    }
}
