use std::os::fd::RawFd;
use std::path::PathBuf;

/// Destino de salida declarado por un perfil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPlan {
    /// La salida es stdout del subproceso y se entrega al llamador.
    Pipe,
    /// La salida es un archivo; stdout sólo lleva el progreso.
    File { extension: &'static str },
}

/// Destino resuelto para un job concreto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Pipe,
    File(PathBuf),
}

/// Perfil declarativo de invocación del multiplexor.
///
/// `inputs` enumera el descriptor del subproceso al que se conecta cada
/// stream de entrada, en orden: `0` es stdin, `3`, `4`, ... son pipes extra
/// (`pipe:3`, `pipe:4` en la sintaxis de ffmpeg). La aridad de `inputs` debe
/// coincidir 1:1 con los `pipe:N` que aparecen en `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeProfile {
    pub name: &'static str,
    pub args: Vec<String>,
    pub inputs: Vec<RawFd>,
    pub output: OutputPlan,
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

impl TranscodeProfile {
    pub fn new(name: &'static str, args: Vec<String>, inputs: Vec<RawFd>, output: OutputPlan) -> Self {
        Self {
            name,
            args,
            inputs,
            output,
        }
    }

    /// Audio para el canal de voz: PCM f32 intercalado, 48 kHz estéreo.
    pub fn voice() -> Self {
        Self::new(
            "voice",
            owned(&[
                "-analyzeduration", "0",
                "-loglevel", "0",
                "-i", "pipe:0",
                "-f", "f32le",
                "-ar", "48000",
                "-ac", "2",
            ]),
            vec![0],
            OutputPlan::Pipe,
        )
    }

    /// Audio + video desde dos pipes independientes a mp4.
    pub fn download_combined() -> Self {
        Self::new(
            "download_combined",
            owned(&[
                "-loglevel", "0",
                "-progress", "pipe:1",
                "-i", "pipe:3",
                "-i", "pipe:4",
                "-map", "0:a",
                "-map", "1:v",
                "-c:a", "aac",
                "-c:v", "libx264",
                "-f", "mp4",
                "-y",
            ]),
            vec![3, 4],
            OutputPlan::File { extension: "mp4" },
        )
    }

    pub fn download_audio() -> Self {
        Self::new(
            "download_audio",
            owned(&[
                "-loglevel", "0",
                "-progress", "pipe:1",
                "-i", "pipe:0",
                "-map", "0:a:0",
                "-c:a", "aac",
                "-f", "mp4",
                "-y",
            ]),
            vec![0],
            OutputPlan::File { extension: "mp4" },
        )
    }

    pub fn download_video() -> Self {
        Self::new(
            "download_video",
            owned(&[
                "-loglevel", "0",
                "-progress", "pipe:1",
                "-i", "pipe:0",
                "-map", "0:v",
                "-c:v", "libx264",
                "-movflags", "use_metadata_tags+faststart+frag_keyframe+empty_moov",
                "-f", "mp4",
                "-y",
            ]),
            vec![0],
            OutputPlan::File { extension: "mp4" },
        )
    }

    /// Extensión del contenedor para perfiles con salida a archivo.
    pub fn extension(&self) -> Option<&'static str> {
        match self.output {
            OutputPlan::File { extension } => Some(extension),
            OutputPlan::Pipe => None,
        }
    }

    /// Vector de argumentos completo: argumentos fijos + destino de salida.
    pub fn command_line(&self, target: &OutputTarget) -> Vec<String> {
        let mut args = self.args.clone();
        match target {
            OutputTarget::Pipe => args.push("pipe:1".to_string()),
            OutputTarget::File(path) => args.push(path.to_string_lossy().into_owned()),
        }
        args
    }

    /// Verifica que el destino corresponda al plan de salida.
    pub fn accepts(&self, target: &OutputTarget) -> bool {
        matches!(
            (self.output, target),
            (OutputPlan::Pipe, OutputTarget::Pipe) | (OutputPlan::File { .. }, OutputTarget::File(_))
        )
    }

    pub(crate) fn reads_stdin(&self) -> bool {
        self.inputs.contains(&0)
    }
}
