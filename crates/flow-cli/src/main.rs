//! CLI de operador sobre el backend Postgres.
//!
//! ```text
//! flow-cli log        --category <C> --uuid <U>
//! flow-cli track      --category <C> --uuid <U> [--user <ID>] [--role <ID>]...
//! flow-cli pending    [--category <C>] [--user <ID>] [--role <ID>]...
//! flow-cli awaiting   --user <ID> [--category <C>]
//! flow-cli cancel     --category <C> --uuid <U>...
//! flow-cli cancel-all --category <C>
//! flow-cli machines   [--category <C>]
//! ```
//!
//! Opciones comunes: `--members <ROLE>:<USER>,<USER>` (repetible) puebla el
//! directorio de roles; `--deadline-ms <N>` (o `FLOW_DEFAULT_DEADLINE_MS`)
//! fija el deadline de las operaciones mutantes.
//!
//! Códigos de salida: 2 uso, 4 rechazo/no encontrado, 5 error de
//! infraestructura.

use std::collections::BTreeSet;
use std::time::Duration;

use flow_core::{FlowEngine, FlowError, MachineFilter, OpCtx, StaticDirectory};
use flow_domain::{Identity, InstanceKey, RoleId, UserId};
use flow_persistence::{PgLedger, PgMachineStore, PoolProvider};
use serde::Serialize;

const USAGE: &str = "Uso: flow-cli <log|track|pending|awaiting|cancel|cancel-all|machines> [opciones]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    command: String,
    category: Option<String>,
    uuids: Vec<String>,
    user: Option<UserId>,
    roles: BTreeSet<RoleId>,
    members: Vec<(RoleId, Vec<UserId>)>,
    deadline_ms: Option<u64>,
}

impl Args {
    fn parse(argv: &[String]) -> Result<Self, String> {
        let mut args = Args { command: argv.first().cloned().ok_or_else(|| USAGE.to_string())?,
                              ..Default::default() };
        let mut i = 1;
        while i < argv.len() {
            let flag = argv[i].as_str();
            let value = argv.get(i + 1).ok_or_else(|| format!("{flag} requiere un valor"))?;
            match flag {
                "--category" => args.category = Some(value.clone()),
                "--uuid" => args.uuids.push(value.clone()),
                "--user" => args.user = Some(parse_num(flag, value)?),
                "--role" => {
                    args.roles.insert(parse_num(flag, value)?);
                }
                "--members" => args.members.push(parse_members(value)?),
                "--deadline-ms" => args.deadline_ms = Some(parse_num(flag, value)?),
                other => return Err(format!("opción desconocida: {other}")),
            }
            i += 2;
        }
        Ok(args)
    }

    fn identity(&self) -> Identity {
        Identity::new(self.user, self.roles.iter().copied())
    }

    fn category(&self) -> Result<&str, String> {
        self.category.as_deref().ok_or_else(|| "falta --category".to_string())
    }

    fn key(&self) -> Result<InstanceKey, String> {
        let uuid = self.uuids.first().ok_or_else(|| "falta --uuid".to_string())?;
        Ok(InstanceKey::new(self.category()?, uuid.as_str()))
    }

    fn ctx(&self) -> OpCtx {
        let env_ms = std::env::var("FLOW_DEFAULT_DEADLINE_MS").ok().and_then(|v| v.parse().ok());
        match self.deadline_ms.or(env_ms) {
            Some(ms) => OpCtx::with_timeout(Duration::from_millis(ms)),
            None => OpCtx::background(),
        }
    }

    fn directory(&self) -> StaticDirectory {
        self.members
            .iter()
            .fold(StaticDirectory::new(), |dir, (role, users)| dir.role(*role, users.iter().copied()))
    }
}

fn parse_num<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value.parse().map_err(|_| format!("{flag}: valor inválido '{value}'"))
}

/// `4:40,41` → (4, [40, 41])
fn parse_members(value: &str) -> Result<(RoleId, Vec<UserId>), String> {
    let (role, users) = value.split_once(':')
                             .ok_or_else(|| format!("--members: se espera ROL:USUARIO,... (got '{value}')"))?;
    let users = users.split(',')
                     .filter(|u| !u.trim().is_empty())
                     .map(|u| parse_num("--members", u.trim()))
                     .collect::<Result<Vec<UserId>, _>>()?;
    Ok((parse_num("--members", role.trim())?, users))
}

enum Failure {
    Usage(String),
    Rejected(FlowError),
    /// Cancelación masiva con fallos individuales.
    Partial(usize),
    Infra(String),
}

impl From<FlowError> for Failure {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::Storage(msg) => Failure::Infra(msg),
            other => Failure::Rejected(other),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Failure> {
    let text = serde_json::to_string_pretty(value).map_err(|e| Failure::Infra(e.to_string()))?;
    println!("{text}");
    Ok(())
}

fn run(args: &Args) -> Result<(), Failure> {
    if !matches!(args.command.as_str(),
                 "log" | "track" | "pending" | "awaiting" | "cancel" | "cancel-all" | "machines")
    {
        return Err(Failure::Usage(format!("comando desconocido: {}", args.command)));
    }
    if std::env::var("DATABASE_URL").is_err() {
        return Err(Failure::Infra("requiere DATABASE_URL para operar contra backend persistente".into()));
    }
    let pool = flow_persistence::build_pool_from_env().map_err(|e| Failure::Infra(format!("pool error: {e}")))?;
    let engine = FlowEngine::new(PgLedger::new(PoolProvider { pool: pool.clone() }),
                                 PgMachineStore::new(PoolProvider { pool }),
                                 args.directory());
    match args.command.as_str() {
        "log" => print_json(&engine.find_log(&args.key().map_err(Failure::Usage)?)?),
        "track" => {
            let key = args.key().map_err(Failure::Usage)?;
            print_json(&engine.find_track(&key, &args.identity())?)
        }
        "pending" => print_json(&engine.find_pending_by_approver(&args.identity(), args.category.as_deref())?),
        "awaiting" => {
            let user = args.user.ok_or_else(|| Failure::Usage("falta --user".into()))?;
            print_json(&engine.find_awaiting_submitter(user, args.category.as_deref())?)
        }
        "cancel" | "cancel-all" => {
            let category = args.category().map_err(Failure::Usage)?;
            let report = if args.command == "cancel" {
                if args.uuids.is_empty() {
                    return Err(Failure::Usage("falta --uuid".into()));
                }
                engine.cancel_by_uuids(&args.ctx(), category, args.uuids.as_slice())
            } else {
                engine.cancel_all_in_category(&args.ctx(), category)?
            };
            for outcome in &report.canceled {
                println!("canceled {}", outcome.key);
            }
            for (key, err) in &report.failed {
                eprintln!("failed {key}: {err}");
            }
            if report.is_clean() {
                Ok(())
            } else {
                Err(Failure::Partial(report.failed.len()))
            }
        }
        _ => {
            let filter = MachineFilter { category: args.category.clone(),
                                         ..Default::default() };
            print_json(&engine.find_machines(&filter)?)
        }
    }
}

fn main() {
    // Cargar .env si existe para obtener DATABASE_URL
    let _ = dotenvy::dotenv();
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match Args::parse(&argv) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{msg}\n{USAGE}");
            std::process::exit(2);
        }
    };
    match run(&args) {
        Ok(()) => {}
        Err(Failure::Usage(msg)) => {
            eprintln!("[flow-cli {}] {msg}\n{USAGE}", args.command);
            std::process::exit(2);
        }
        Err(Failure::Rejected(e)) => {
            eprintln!("[flow-cli {}] rechazado: {e}", args.command);
            std::process::exit(4);
        }
        Err(Failure::Partial(failed)) => {
            eprintln!("[flow-cli {}] {failed} instancias no se cancelaron", args.command);
            std::process::exit(4);
        }
        Err(Failure::Infra(msg)) => {
            eprintln!("[flow-cli {}] error: {msg}", args.command);
            std::process::exit(5);
        }
    }
}
