use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::{collections::VecDeque, time::Duration};
use tracing::info;

/// Track resuelto listo para enviarse a un nodo de audio.
///
/// El `identifier` es lo que el nodo recibe en el op `play` (URL o id de
/// búsqueda ya resuelto por el proveedor externo).
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub identifier: String,
    pub title: String,
    pub artist: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub url: String,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl QueueItem {
    /// Duración en milisegundos, 0 para streams en vivo.
    pub fn duration_ms(&self) -> u64 {
        self.duration.map(|d| d.as_millis() as u64).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopMode {
    Off,
    Track,
    Queue,
}

#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<QueueItem>,
    current: Option<QueueItem>,
    history: Vec<QueueItem>,
    loop_mode: LoopMode,
    shuffle: bool,
    max_size: usize,
    max_history: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            current: None,
            history: Vec::new(),
            loop_mode: LoopMode::Off,
            shuffle: false,
            max_size,
            max_history: 50,
        }
    }

    /// Agrega un track a la cola
    pub fn add_track(&mut self, item: QueueItem) -> Result<()> {
        if self.items.len() >= self.max_size {
            anyhow::bail!("La cola está llena (máximo {} canciones)", self.max_size);
        }

        info!("➕ Agregado a la cola: {}", item.title);
        self.items.push_back(item);

        Ok(())
    }

    /// Obtiene el siguiente track (FIFO, salvo shuffle o loop)
    pub fn next_track(&mut self) -> Option<QueueItem> {
        // Guardar current en history si existe
        if let Some(current) = self.current.take() {
            self.add_to_history(current.clone());

            if self.loop_mode == LoopMode::Track {
                info!("🔂 Repitiendo track: {}", current.title);
                self.current = Some(current.clone());
                return Some(current);
            }
        }

        let next = if self.shuffle && !self.items.is_empty() {
            let mut rng = rand::thread_rng();
            let index = (0..self.items.len())
                .collect::<Vec<_>>()
                .choose(&mut rng)
                .copied()
                .unwrap_or(0);
            self.items.remove(index)
        } else {
            self.items.pop_front()
        };

        if let Some(next_item) = next {
            if self.loop_mode == LoopMode::Queue {
                self.items.push_back(next_item.clone());
            }

            self.current = Some(next_item.clone());
            Some(next_item)
        } else {
            None
        }
    }

    /// Marca el track actual como terminado sin avanzar
    pub fn finish_current(&mut self) {
        if let Some(current) = self.current.take() {
            self.add_to_history(current);
        }
    }

    /// Cambia el modo de shuffle
    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        self.shuffle
    }

    /// Cambia el modo de loop
    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// Obtiene el track actual
    pub fn current(&self) -> Option<&QueueItem> {
        self.current.as_ref()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.current.is_none()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    fn add_to_history(&mut self, item: QueueItem) {
        self.history.push(item);
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(title: &str) -> QueueItem {
        QueueItem {
            identifier: format!("https://example.com/{title}"),
            title: title.to_string(),
            artist: Some("Artista".to_string()),
            duration: Some(Duration::from_secs(180)),
            thumbnail: None,
            url: format!("https://example.com/{title}"),
            requested_by: UserId::new(1),
            added_at: Utc::now(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = TrackQueue::new(10);
        queue.add_track(item("a")).unwrap();
        queue.add_track(item("b")).unwrap();

        assert_eq!(queue.next_track().unwrap().title, "a");
        assert_eq!(queue.next_track().unwrap().title, "b");
        assert!(queue.next_track().is_none());
    }

    #[test]
    fn test_loop_track_repeats_current() {
        let mut queue = TrackQueue::new(10);
        queue.add_track(item("a")).unwrap();
        queue.set_loop_mode(LoopMode::Track);

        assert_eq!(queue.next_track().unwrap().title, "a");
        assert_eq!(queue.next_track().unwrap().title, "a");
    }

    #[test]
    fn test_queue_full_is_rejected() {
        let mut queue = TrackQueue::new(1);
        queue.add_track(item("a")).unwrap();
        assert!(queue.add_track(item("b")).is_err());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_finish_current_leaves_queue_idle() {
        let mut queue = TrackQueue::new(10);
        queue.add_track(item("a")).unwrap();
        queue.next_track();
        assert!(queue.current().is_some());

        queue.finish_current();
        assert!(queue.current().is_none());
        assert!(queue.is_empty());
    }
}
