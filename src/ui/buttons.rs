use serenity::all::ButtonStyle;
use serenity::builder::{CreateActionRow, CreateButton};

/// IDs personalizados para los botones
pub mod button_ids {
    pub const PLAY_PAUSE: &str = "player_play_pause";
    pub const SKIP: &str = "player_skip";
    pub const STOP: &str = "player_stop";
    pub const ACTIVITY_CONFIRM: &str = "activity_keep_alive";
}

/// Controles principales del panel de reproducción.
pub fn player_controls(paused: bool, disabled: bool) -> Vec<CreateActionRow> {
    let play_pause_emoji = if paused { '▶' } else { '⏸' };

    let play_pause_btn = CreateButton::new(button_ids::PLAY_PAUSE)
        .emoji(play_pause_emoji)
        .style(ButtonStyle::Primary)
        .disabled(disabled);

    let skip_btn = CreateButton::new(button_ids::SKIP)
        .emoji('⏭')
        .style(ButtonStyle::Secondary)
        .disabled(disabled);

    let stop_btn = CreateButton::new(button_ids::STOP)
        .emoji('⏹')
        .style(ButtonStyle::Danger)
        .disabled(disabled);

    vec![CreateActionRow::Buttons(vec![
        play_pause_btn,
        skip_btn,
        stop_btn,
    ])]
}

/// Botón de confirmación del chequeo de actividad.
pub fn activity_confirm_row(disabled: bool) -> CreateActionRow {
    let confirm_btn = CreateButton::new(button_ids::ACTIVITY_CONFIRM)
        .label("Sigo escuchando")
        .emoji('🎧')
        .style(ButtonStyle::Success)
        .disabled(disabled);

    CreateActionRow::Buttons(vec![confirm_btn])
}
