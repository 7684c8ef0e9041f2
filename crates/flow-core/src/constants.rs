/// Nombre mostrado cuando el nivel de una fila ya no existe en la máquina o
/// los niveles cambiaron desde que se escribió.
pub const UNKNOWN_LEVEL: &str = "unknown level";

/// Nombre mostrado para cancelaciones administrativas (sin actor).
pub const SYSTEM_ACTOR: &str = "system";
