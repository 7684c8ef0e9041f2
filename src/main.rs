use approvalflow::config::CONFIG;
use approvalflow::scenarios::{approve_all_levels, cancel_by_submitter, leave_machine};
use flow_core::{FlowEngine, IdentityResolver, LedgerStore, MachineStore, StaticDirectory};
use flow_domain::{Identity, InstanceKey};

fn directory() -> StaticDirectory {
    StaticDirectory::new().role(4, [40, 41]).role(5, [50])
}

/// Corre ambos recorridos sobre `engine` e imprime log e historial.
fn run_scenarios<L, M, I>(label: &str, engine: &FlowEngine<L, M, I>, category: &str)
    where L: LedgerStore,
          M: MachineStore,
          I: IdentityResolver
{
    let ctx = CONFIG.op_ctx();
    let machine = engine.create_machine(leave_machine(category)).expect("machine");
    println!("[{label}] machine id={} levels_hash={}", machine.id, machine.levels_hash);

    let key = InstanceKey::new(category, "log1");
    let rows = approve_all_levels(engine, &ctx, machine.id, &key).expect("approval chain");
    for row in &rows {
        println!("[{label}] {} rev={} level={} -> {}", row.action, row.revision, row.level_index, row.status);
    }
    let track = engine.find_track(&key, &Identity::user(123)).expect("track");
    println!("[{label}] track={}",
             serde_json::to_string_pretty(&track).unwrap_or_default());

    let key = InstanceKey::new(category, "log2");
    let (denied, canceled) = cancel_by_submitter(engine, &ctx, machine.id, &key).expect("cancel scenario");
    match denied {
        Ok(d) => println!("[{label}] cancel by user 5 unexpectedly accepted, status={}", d.status),
        Err(e) => println!("[{label}] cancel by user 5: {e}"),
    }
    println!("[{label}] cancel by submitter -> {} (log rows={})",
             canceled.status,
             engine.find_log(&key).map(|l| l.len()).unwrap_or_default());
}

#[cfg(feature = "pg_demo")]
fn maybe_run_pg_demo() {
    use flow_persistence::{build_pool, PgLedger, PgMachineStore, PoolProvider};

    let Some(db) = CONFIG.database.as_ref() else {
        eprintln!("[PG DEMO] DATABASE_URL no definido; omitiendo demo PG");
        return;
    };
    let pool = match build_pool(&db.url, db.min_connections, db.max_connections) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[PG DEMO] Error construyendo pool: {e}");
            return;
        }
    };
    let engine = FlowEngine::new(PgLedger::new(PoolProvider { pool: pool.clone() }),
                                 PgMachineStore::new(PoolProvider { pool }),
                                 directory());
    run_scenarios("pg", &engine, &format!("leave-{}", uuid::Uuid::new_v4()));
}

fn main() {
    // Cargar variables de entorno desde .env si existe (antes de leer DATABASE_URL)
    let _ = dotenvy::dotenv();
    let engine = FlowEngine::in_memory(directory());
    run_scenarios("mem", &engine, "leave");

    #[cfg(feature = "pg_demo")]
    maybe_run_pg_demo();
    #[cfg(not(feature = "pg_demo"))]
    eprintln!("[PG DEMO] Skipping (compile with --features pg_demo to enable)");
}
