use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{BroadcastEvent, EventHandler, EventProducer, Handler, NotificationEvent, TradeSettledEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub notification_producer: Vec<EventProducer<NotificationEvent>>,
    pub broadcast_producer: Vec<EventProducer<BroadcastEvent>>,
    pub trade_settled_producer: Vec<EventProducer<TradeSettledEvent>>,
}

impl EventProducers {
    pub async fn notify(&self, event: NotificationEvent) {
        for producer in &self.notification_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn broadcast(&self, event: BroadcastEvent) {
        for producer in &self.broadcast_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn trade_settled(&self, event: TradeSettledEvent) {
        for producer in &self.trade_settled_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_notification: Option<EventHandler<NotificationEvent>>,
    pub on_broadcast: Option<EventHandler<BroadcastEvent>>,
    pub on_trade_settled: Option<EventHandler<TradeSettledEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_notification = hooks.on_notification.map(|f| EventHandler::new(buffer_size, f));
        let on_broadcast = hooks.on_broadcast.map(|f| EventHandler::new(buffer_size, f));
        let on_trade_settled = hooks.on_trade_settled.map(|f| EventHandler::new(buffer_size, f));
        Self { on_notification, on_broadcast, on_trade_settled }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_notification {
            result.notification_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_broadcast {
            result.broadcast_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_trade_settled {
            result.trade_settled_producer.push(handler.subscribe());
        }
        result
    }

    /// Runs every handler on the current task, returning once all producers have been dropped and every in-flight
    /// handler has finished. Tests use this to drain deterministically.
    pub async fn run_to_completion(self) {
        if let Some(handler) = self.on_notification {
            handler.start_handler().await;
        }
        if let Some(handler) = self.on_broadcast {
            handler.start_handler().await;
        }
        if let Some(handler) = self.on_trade_settled {
            handler.start_handler().await;
        }
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_notification {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_broadcast {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_trade_settled {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_notification: Option<Handler<NotificationEvent>>,
    pub on_broadcast: Option<Handler<BroadcastEvent>>,
    pub on_trade_settled: Option<Handler<TradeSettledEvent>>,
}

impl EventHooks {
    pub fn on_notification<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(NotificationEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_notification = Some(Arc::new(f));
        self
    }

    pub fn on_broadcast<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(BroadcastEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_broadcast = Some(Arc::new(f));
        self
    }

    pub fn on_trade_settled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TradeSettledEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_trade_settled = Some(Arc::new(f));
        self
    }
}
