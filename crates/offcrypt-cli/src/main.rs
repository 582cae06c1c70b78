use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use zeroize::Zeroizing;

use offcrypt::{
    decode, detect, encode, inspect, secret_key_from_key_file, DecodeOptions, DecodeOutcome,
    EncodeOptions, EncodeOutcome, Format, Password,
};

mod key_input;

/// Documents are addressed with 32-bit sizes inside the container.
const MAX_INPUT_LEN: u64 = u32::MAX as u64;

/// Binary Office formats use RC4/CryptoAPI encryption, which this tool does not handle.
const LEGACY_EXTENSIONS: &[&str] = &["xls", "xlt", "xla", "ppt", "pot", "pps", "ppa", "doc", "dot"];

#[derive(Debug, Parser)]
#[command(name = "msoffice-crypt", version)]
#[command(about = "Encrypt or decrypt Office Open XML documents (MS-OFFCRYPTO Standard/Agile).")]
#[command(after_help = "Without -e or -d the input's encryption parameters are printed.\n\
Exit status: 0 success, 1 error, 2 nothing to do, 3 wrong password.")]
struct Args {
    /// Encrypt INPUT.
    #[arg(short = 'e', long = "encrypt", conflicts_with = "decrypt")]
    encrypt: bool,

    /// Decrypt INPUT.
    #[arg(short = 'd', long = "decrypt")]
    decrypt: bool,

    /// Password as text.
    #[arg(short = 'p', long = "password", conflicts_with_all = ["password_utf8_hex", "password_utf16"])]
    password: Option<String>,

    /// Password as hex-encoded UTF-8 bytes (e.g. `68656C6C6F`).
    #[arg(long = "ph8", value_name = "HEX", conflicts_with = "password_utf16")]
    password_utf8_hex: Option<String>,

    /// Password as UTF-16 code units (e.g. `u3042u3044`).
    #[arg(long = "ph16", value_name = "uXXXX...")]
    password_utf16: Option<String>,

    /// Package secret key in hex, as printed by `--psk`.
    #[arg(short = 'k', long = "secret-key", value_name = "HEX", conflicts_with = "key_file")]
    secret_key: Option<String>,

    /// Key file holding the secret key; the password unlocks the key file.
    #[arg(long = "by", value_name = "KEYFILE")]
    key_file: Option<PathBuf>,

    /// Agile profile: 0 = AES-128/SHA-1 (Office 2010), 1 = AES-256/SHA-512 (Office 2013).
    #[arg(long = "enc-mode", value_name = "MODE", value_parser = clap::value_parser!(u8).range(0..=1))]
    enc_mode: Option<u8>,

    /// Encrypt with Standard (AES-128 ECB) encryption instead of Agile.
    #[arg(long, conflicts_with = "enc_mode")]
    standard: bool,

    /// Key-derivation spin count for Agile encryption.
    #[arg(short = 'c', long = "spin", value_name = "SPIN")]
    spin_count: Option<u32>,

    /// Print the package secret key in hex.
    #[arg(long)]
    psk: bool,

    /// Decrypt even if the Agile dataIntegrity HMAC does not match.
    #[arg(long = "no-integrity")]
    skip_integrity: bool,

    /// Debug logging on stderr.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Trace logging on stderr.
    #[arg(long = "vv")]
    very_verbose: bool,

    /// Input document.
    input: PathBuf,

    /// Output document (default: `<name>_e.<ext>` or `<name>_d.<ext>` next to INPUT).
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Done,
    NothingToDo,
    WrongPassword,
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        match status {
            Status::Done => ExitCode::SUCCESS,
            Status::NothingToDo => ExitCode::from(2),
            Status::WrongPassword => ExitCode::from(3),
        }
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            // Usage errors share the general-error code; 2 is reserved for no-op runs.
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_logging(&args);

    match run(&args) {
        Ok(status) => status.into(),
        Err(err) => {
            eprintln!("msoffice-crypt: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Args) {
    let level = if args.very_verbose {
        LevelFilter::TRACE
    } else if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    // Also installs the `log` bridge, which is how the engine's records arrive.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run(args: &Args) -> Result<Status> {
    refuse_legacy_format(&args.input)?;
    let bytes = offcrypt_fs::read_bounded(&args.input, MAX_INPUT_LEN)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let (password, secret_key) = key_material(args)?;

    if args.encrypt {
        encrypt(args, &bytes, password.as_ref(), secret_key.as_deref().map(Vec::as_slice))
    } else if args.decrypt {
        decrypt(args, &bytes, password.as_ref(), secret_key.as_deref().map(Vec::as_slice))
    } else {
        view(&bytes, password.as_ref(), secret_key.as_deref().map(Vec::as_slice))
    }
}

fn refuse_legacy_format(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if LEGACY_EXTENSIONS.contains(&ext.as_str()) {
        bail!(
            "{} is a legacy binary Office document (.{ext}); only OOXML documents are supported",
            path.display()
        );
    }
    Ok(())
}

/// Resolve the password and secret key for the document.
///
/// With `--by`, the password belongs to the key file and the document is keyed by the secret it
/// yields.
fn key_material(args: &Args) -> Result<(Option<Password>, Option<Zeroizing<Vec<u8>>>)> {
    let password = if let Some(text) = &args.password {
        Some(Password::new(text))
    } else if let Some(hex_text) = &args.password_utf8_hex {
        Some(key_input::password_from_utf8_hex(hex_text)?)
    } else if let Some(units) = &args.password_utf16 {
        Some(key_input::password_from_utf16_units(units)?)
    } else {
        None
    };

    if let Some(key_file) = &args.key_file {
        let Some(password) = password else {
            bail!("--by needs the key file's password (-p, --ph8 or --ph16)");
        };
        let key_bytes = offcrypt_fs::read_bounded(key_file, MAX_INPUT_LEN)
            .with_context(|| format!("reading key file {}", key_file.display()))?;
        let secret = secret_key_from_key_file(&key_bytes, &password)?;
        return Ok((None, Some(secret)));
    }

    let secret = args
        .secret_key
        .as_deref()
        .map(key_input::secret_key_from_hex)
        .transpose()?;
    Ok((password, secret))
}

fn require_key(password: Option<&Password>, secret_key: Option<&[u8]>) -> Result<()> {
    if password.is_none() && secret_key.is_none() {
        bail!("a password (-p, --ph8, --ph16) or a secret key (-k, --by) is required");
    }
    Ok(())
}

fn encode_options(args: &Args) -> EncodeOptions {
    let mut options = if args.standard {
        EncodeOptions::standard()
    } else if args.enc_mode == Some(1) {
        EncodeOptions::office2013()
    } else {
        EncodeOptions::default()
    };
    if let Some(spin) = args.spin_count {
        if args.standard {
            log::warn!("Standard encryption always uses 50000 rounds; ignoring -c {spin}");
        } else {
            options.spin_count = spin;
        }
    }
    options.expose_secret_key = args.psk;
    options
}

fn output_path(args: &Args, tag: &str) -> Result<PathBuf> {
    match &args.output {
        Some(path) => Ok(path.clone()),
        None => offcrypt_fs::tagged_sibling(&args.input, tag)
            .with_context(|| format!("cannot derive an output name from {}", args.input.display())),
    }
}

fn encrypt(
    args: &Args,
    bytes: &[u8],
    password: Option<&Password>,
    secret_key: Option<&[u8]>,
) -> Result<Status> {
    require_key(password, secret_key)?;
    let options = encode_options(args);
    let encrypted = match encode(bytes, password, secret_key, &options)? {
        EncodeOutcome::Encrypted(encrypted) => encrypted,
        EncodeOutcome::AlreadyEncrypted => {
            eprintln!("{} is already encrypted", args.input.display());
            return Ok(Status::NothingToDo);
        }
    };

    let output = output_path(args, "e")?;
    offcrypt_fs::write_atomic(&output, &encrypted.container)
        .with_context(|| format!("writing {}", output.display()))?;
    log::info!("wrote {} ({} bytes)", output.display(), encrypted.container.len());

    if let Some(key) = &encrypted.secret_key {
        print_stdout(&format!("secret key: {}", hex::encode(key.as_slice())))?;
    }
    Ok(Status::Done)
}

fn decrypt(
    args: &Args,
    bytes: &[u8],
    password: Option<&Password>,
    secret_key: Option<&[u8]>,
) -> Result<Status> {
    require_key(password, secret_key)?;
    let options = DecodeOptions {
        verify_integrity: !args.skip_integrity,
        expose_secret_key: args.psk,
    };
    let decrypted = match decode(bytes, password, secret_key, &options)? {
        DecodeOutcome::Decrypted(decrypted) => decrypted,
        DecodeOutcome::AlreadyDecrypted => {
            eprintln!("{} is not encrypted", args.input.display());
            return Ok(Status::NothingToDo);
        }
        DecodeOutcome::AuthenticationFailed => {
            eprintln!("wrong password");
            return Ok(Status::WrongPassword);
        }
    };

    let output = output_path(args, "d")?;
    offcrypt_fs::write_atomic(&output, &decrypted.package)
        .with_context(|| format!("writing {}", output.display()))?;
    log::info!(
        "wrote {} ({} bytes, {} encryption)",
        output.display(),
        decrypted.package.len(),
        decrypted.scheme
    );

    if let Some(key) = &decrypted.secret_key {
        print_stdout(&format!("secret key: {}", hex::encode(key.as_slice())))?;
    }
    Ok(Status::Done)
}

/// Describe the input. When key material is given, also report whether it opens the document.
fn view(bytes: &[u8], password: Option<&Password>, secret_key: Option<&[u8]>) -> Result<Status> {
    match detect(bytes) {
        Format::Zip => {
            print_stdout("format:           OOXML package (not encrypted)")?;
            return Ok(Status::Done);
        }
        Format::Unknown => bail!("input is neither an encrypted container nor an OOXML package"),
        Format::Cfb => {}
    }

    let summary = inspect(bytes)?;
    print_stdout(&summary.to_string())?;
    if password.is_none() && secret_key.is_none() {
        return Ok(Status::Done);
    }

    match decode(bytes, password, secret_key, &DecodeOptions::default())? {
        DecodeOutcome::Decrypted(_) => {
            print_stdout("key material:     ok")?;
            Ok(Status::Done)
        }
        DecodeOutcome::AuthenticationFailed => {
            print_stdout("key material:     wrong password")?;
            Ok(Status::WrongPassword)
        }
        DecodeOutcome::AlreadyDecrypted => Ok(Status::Done),
    }
}

/// Print a line, treating a closed stdout as success.
fn print_stdout(line: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other.context("writing to stdout"),
    }
}
